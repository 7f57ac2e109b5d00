//! Command Submission Endpoint
//!
//! `POST /commands` produces the posted envelope onto the command topic and
//! waits for its response, like any other client would.

use super::AppState;
use crate::client::{ClientError, SendTarget};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cgw_core::{CommandEnvelope, Partition, ShardId};
use serde::{Deserialize, Serialize};

/// Optional placement of the command
#[derive(Debug, Default, Deserialize)]
pub struct CommandQuery {
    pub partition: Option<Partition>,
    pub shard: Option<ShardId>,
}

impl CommandQuery {
    fn target(&self) -> SendTarget {
        match (self.partition, self.shard) {
            (Some(p), _) => SendTarget::Partition(p),
            (None, Some(shard)) => SendTarget::Shard(shard),
            (None, None) => SendTarget::Key,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorResponse { error: error.to_string() })).into_response()
}

/// POST /commands?partition=&shard=
#[tracing::instrument(skip(state, cmd), fields(shard_id = state.shard_id, uuid = %cmd.uuid))]
pub async fn post_command(
    State(state): State<AppState>,
    Query(query): Query<CommandQuery>,
    Json(cmd): Json<CommandEnvelope>,
) -> Response {
    if let Err(e) = cmd.validate() {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    match state.client.send(&cmd, query.target()).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e @ ClientError::Timeout { .. }) => error_response(StatusCode::GATEWAY_TIMEOUT, e),
        Err(e @ ClientError::Broker(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e @ ClientError::DuplicateUuid(_)) => error_response(StatusCode::CONFLICT, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_wins_over_shard() {
        let query = CommandQuery {
            partition: Some(1),
            shard: Some(0),
        };
        assert_eq!(query.target(), SendTarget::Partition(1));
        assert_eq!(
            CommandQuery { partition: None, shard: Some(2) }.target(),
            SendTarget::Shard(2)
        );
        assert_eq!(CommandQuery::default().target(), SendTarget::Key);
    }
}
