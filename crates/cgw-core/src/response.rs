//! Response envelopes
//!
//! Exactly one response is published per accepted command. The
//! `reporter_shard_id` field names the shard that executed the command, which
//! is the group owner even when the command was produced to another shard's
//! partition.

use crate::command::CommandEnvelope;
use crate::{GroupId, ShardId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub response_type: String,
    pub infra_group_id: GroupId,
    pub uuid: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub reporter_shard_id: ShardId,
    /// Devices that could not be applied; present only for infra commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_infras: Option<Vec<String>>,
}

impl ResponseEnvelope {
    fn answering(cmd: &CommandEnvelope, reporter_shard_id: ShardId) -> Self {
        Self {
            response_type: cmd.kind.response_type(),
            infra_group_id: cmd.infra_group_id,
            uuid: cmd.uuid,
            success: true,
            error_message: None,
            reporter_shard_id,
            failed_infras: cmd.kind.is_infra().then(Vec::new),
        }
    }

    /// Successful answer to `cmd`.
    pub fn ok(cmd: &CommandEnvelope, reporter_shard_id: ShardId) -> Self {
        Self::answering(cmd, reporter_shard_id)
    }

    /// Failed answer to `cmd`. For infra commands every requested device is
    /// listed as failed, since none was applied.
    pub fn failure(
        cmd: &CommandEnvelope,
        reporter_shard_id: ShardId,
        error_message: impl Into<String>,
    ) -> Self {
        let mut response = Self::answering(cmd, reporter_shard_id);
        response.success = false;
        response.error_message = Some(error_message.into());
        if cmd.kind.is_infra() {
            response.failed_infras = Some(cmd.infra_group_infras.clone());
        }
        response
    }

    /// Answer to a device batch. Success iff no device failed.
    pub fn infras(
        cmd: &CommandEnvelope,
        reporter_shard_id: ShardId,
        failed_infras: Vec<String>,
    ) -> Self {
        let mut response = Self::answering(cmd, reporter_shard_id);
        if !failed_infras.is_empty() {
            response.success = false;
            let verb = if cmd.kind.is_remove() { "remove" } else { "add" };
            response.error_message = Some(format!(
                "Failed to {verb} {} of {} infra(s) for group {}",
                failed_infras.len(),
                cmd.infra_group_infras.len(),
                cmd.infra_group_id
            ));
        }
        response.failed_infras = Some(failed_infras);
        response
    }

    /// Devices reported as failed; empty for non-infra responses.
    pub fn failed(&self) -> &[String] {
        self.failed_infras.as_deref().unwrap_or_default()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
