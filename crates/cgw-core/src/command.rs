//! Command envelopes
//!
//! Commands are JSON objects produced onto the command topic, keyed by the
//! decimal group id. The `type` field selects the operation.

use crate::{GroupId, ShardId};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// Operation requested by a command envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum CommandKind {
    #[strum(serialize = "infrastructure_group_create")]
    GroupCreate,
    #[strum(serialize = "infrastructure_group_create_to_shard")]
    GroupCreateToShard,
    #[strum(serialize = "infrastructure_group_delete")]
    GroupDelete,
    #[strum(serialize = "infrastructure_group_infras_add")]
    InfrasAdd,
    #[strum(serialize = "infrastructure_group_infras_remove")]
    InfrasRemove,
    /// Older spelling of `InfrasRemove`; answered with its own response type.
    #[strum(serialize = "infrastructure_group_infras_del")]
    InfrasDel,
}

impl CommandKind {
    /// `type` tag of the response answering this kind of command.
    pub fn response_type(&self) -> String {
        format!("{self}_response")
    }

    /// Whether this command creates a new group rather than addressing an existing one.
    pub fn is_create(&self) -> bool {
        matches!(self, CommandKind::GroupCreate | CommandKind::GroupCreateToShard)
    }

    /// Whether this command carries a device list.
    pub fn is_infra(&self) -> bool {
        matches!(self, CommandKind::InfrasAdd) || self.is_remove()
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, CommandKind::InfrasRemove | CommandKind::InfrasDel)
    }
}

impl Serialize for CommandKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CommandKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown command type '{s}'")))
    }
}

/// Serde module for group ids carried as decimal strings.
///
/// Plain JSON integers are accepted on input as well.
mod group_id_string {
    use crate::GroupId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(GroupId),
        Text(String),
    }

    pub fn serialize<S>(id: &GroupId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<GroupId, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(id),
            Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Errors produced while decoding a command from the wire.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{kind} command for group {group_id} is missing shard_id")]
    MissingShardId { kind: CommandKind, group_id: GroupId },
}

/// A command as carried on the command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(with = "group_id_string")]
    pub infra_group_id: GroupId,
    /// Client-generated correlation id, echoed in the response
    pub uuid: Uuid,
    /// Explicit owner for `infrastructure_group_create_to_shard`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<ShardId>,
    /// Hardware addresses, as sent by the client
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infra_group_infras: Vec<String>,
}

impl CommandEnvelope {
    fn new(kind: CommandKind, infra_group_id: GroupId, uuid: Uuid) -> Self {
        Self {
            kind,
            infra_group_id,
            uuid,
            shard_id: None,
            infra_group_infras: Vec::new(),
        }
    }

    pub fn group_create(infra_group_id: GroupId, uuid: Uuid) -> Self {
        Self::new(CommandKind::GroupCreate, infra_group_id, uuid)
    }

    pub fn group_create_to_shard(infra_group_id: GroupId, shard_id: ShardId, uuid: Uuid) -> Self {
        Self {
            shard_id: Some(shard_id),
            ..Self::new(CommandKind::GroupCreateToShard, infra_group_id, uuid)
        }
    }

    pub fn group_delete(infra_group_id: GroupId, uuid: Uuid) -> Self {
        Self::new(CommandKind::GroupDelete, infra_group_id, uuid)
    }

    pub fn infras_add<I, S>(infra_group_id: GroupId, infras: I, uuid: Uuid) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            infra_group_infras: infras.into_iter().map(Into::into).collect(),
            ..Self::new(CommandKind::InfrasAdd, infra_group_id, uuid)
        }
    }

    pub fn infras_remove<I, S>(infra_group_id: GroupId, infras: I, uuid: Uuid) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            infra_group_infras: infras.into_iter().map(Into::into).collect(),
            ..Self::new(CommandKind::InfrasRemove, infra_group_id, uuid)
        }
    }

    /// Decode and validate a command read from the broker.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CommandError> {
        let cmd: CommandEnvelope = serde_json::from_slice(bytes)?;
        cmd.validate()?;
        Ok(cmd)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        if self.kind == CommandKind::GroupCreateToShard && self.shard_id.is_none() {
            return Err(CommandError::MissingShardId {
                kind: self.kind,
                group_id: self.infra_group_id,
            });
        }
        Ok(())
    }

    /// Shard explicitly requested as owner of a group being created.
    pub fn target_shard(&self) -> Option<ShardId> {
        match self.kind {
            CommandKind::GroupCreateToShard => self.shard_id,
            _ => None,
        }
    }

    /// Producer key for this command: the group id in decimal.
    pub fn partition_key(&self) -> Vec<u8> {
        self.infra_group_id.to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_strings() {
        assert_eq!(
            CommandKind::InfrasAdd.to_string(),
            "infrastructure_group_infras_add"
        );
        assert_eq!(
            "infrastructure_group_create_to_shard".parse::<CommandKind>().unwrap(),
            CommandKind::GroupCreateToShard
        );
    }

    #[test]
    fn test_del_spelling_is_kept() {
        let kind = "infrastructure_group_infras_del".parse::<CommandKind>().unwrap();
        assert_eq!(kind, CommandKind::InfrasDel);
        assert!(kind.is_remove());
        assert!(kind.is_infra());
        assert_eq!(kind.response_type(), "infrastructure_group_infras_del_response");
        assert_eq!(
            CommandKind::InfrasRemove.response_type(),
            "infrastructure_group_infras_remove_response"
        );
    }

    #[test]
    fn test_decode_del_command() {
        let json = r#"{
            "type": "infrastructure_group_infras_del",
            "infra_group_id": "100",
            "uuid": "6f1c2a4e-8a5b-4c1d-9e2f-0a1b2c3d4e5f",
            "infra_group_infras": ["11-22-33-44-55-66"]
        }"#;
        let cmd = CommandEnvelope::from_slice(json.as_bytes()).unwrap();
        assert_eq!(cmd.kind, CommandKind::InfrasDel);
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "infrastructure_group_infras_del");
    }

    #[test]
    fn test_response_type() {
        assert_eq!(
            CommandKind::GroupDelete.response_type(),
            "infrastructure_group_delete_response"
        );
    }

    #[test]
    fn test_decode_string_encoded_group_id() {
        let json = r#"{
            "type": "infrastructure_group_infras_add",
            "infra_group_id": "100",
            "uuid": "6f1c2a4e-8a5b-4c1d-9e2f-0a1b2c3d4e5f",
            "infra_group_infras": ["11-22-33-44-55-66"]
        }"#;
        let cmd = CommandEnvelope::from_slice(json.as_bytes()).unwrap();
        assert_eq!(cmd.kind, CommandKind::InfrasAdd);
        assert_eq!(cmd.infra_group_id, 100);
        assert_eq!(cmd.infra_group_infras, vec!["11-22-33-44-55-66"]);
        assert_eq!(cmd.target_shard(), None);
    }

    #[test]
    fn test_decode_numeric_group_id() {
        let json = r#"{
            "type": "infrastructure_group_delete",
            "infra_group_id": 7,
            "uuid": "6f1c2a4e-8a5b-4c1d-9e2f-0a1b2c3d4e5f"
        }"#;
        let cmd = CommandEnvelope::from_slice(json.as_bytes()).unwrap();
        assert_eq!(cmd.infra_group_id, 7);
    }

    #[test]
    fn test_create_to_shard_requires_shard_id() {
        let json = r#"{
            "type": "infrastructure_group_create_to_shard",
            "infra_group_id": "100",
            "uuid": "6f1c2a4e-8a5b-4c1d-9e2f-0a1b2c3d4e5f"
        }"#;
        let err = CommandEnvelope::from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(err, CommandError::MissingShardId { group_id: 100, .. }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"type": "reboot", "infra_group_id": "1", "uuid": "6f1c2a4e-8a5b-4c1d-9e2f-0a1b2c3d4e5f"}"#;
        assert!(matches!(
            CommandEnvelope::from_slice(json.as_bytes()),
            Err(CommandError::Decode(_))
        ));
    }

    #[test]
    fn test_encoded_form_carries_group_id_as_string() {
        let cmd = CommandEnvelope::group_create_to_shard(100, 0, Uuid::nil());
        let value: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "infrastructure_group_create_to_shard");
        assert_eq!(value["infra_group_id"], "100");
        assert_eq!(value["shard_id"], 0);
        assert!(value.get("infra_group_infras").is_none());
        assert_eq!(cmd.target_shard(), Some(0));
        assert_eq!(cmd.partition_key(), b"100".to_vec());
    }
}
