use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    UpsertTenant,
    DeleteTenant,
    UpsertClient,
    DeleteClient,
    UpsertScope,
    DeleteScope,
    UpsertClaim,
    DeleteClaim,
    RotateKeys,
    RevokeKey,
    UpsertAdmin,
    DeleteAdmin,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::UpsertTenant => "upsert_tenant",
            CommandKind::DeleteTenant => "delete_tenant",
            CommandKind::UpsertClient => "upsert_client",
            CommandKind::DeleteClient => "delete_client",
            CommandKind::UpsertScope => "upsert_scope",
            CommandKind::DeleteScope => "delete_scope",
            CommandKind::UpsertClaim => "upsert_claim",
            CommandKind::DeleteClaim => "delete_claim",
            CommandKind::RotateKeys => "rotate_keys",
            CommandKind::RevokeKey => "revoke_key",
            CommandKind::UpsertAdmin => "upsert_admin",
            CommandKind::DeleteAdmin => "delete_admin",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            CommandKind::DeleteTenant
                | CommandKind::DeleteClient
                | CommandKind::DeleteScope
                | CommandKind::DeleteClaim
                | CommandKind::DeleteAdmin
        )
    }
}

/// A control-plane mutation as it travels through the log.
///
/// Everything apply needs is carried in the command itself, including the
/// leader's timestamp, so every node reaches the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Entity key inside the tenant: client id, scope name, kid, admin id.
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Leader wall clock (unix seconds) at submission.
    pub ts: i64,
}

impl Command {
    pub fn new(kind: CommandKind, tenant: Option<&str>, key: impl Into<String>, payload: Value, ts: i64) -> Self {
        Self {
            kind,
            tenant: tenant.map(str::to_string),
            key: key.into(),
            if_match: None,
            payload,
            ts,
        }
    }

    pub fn with_if_match(mut self, if_match: Option<String>) -> Self {
        self.if_match = if_match;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    PreconditionFailed,
    Conflict,
    Invalid,
    Degraded,
}

/// Outcome of applying one command. Rejections are deterministic, so every
/// node records the same outcome for the same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandResponse {
    Applied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
        #[serde(default)]
        value: Value,
    },
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

impl CommandResponse {
    pub fn noop() -> Self {
        CommandResponse::Applied {
            etag: None,
            value: Value::Null,
        }
    }

    pub fn applied(etag: Option<String>, value: Value) -> Self {
        CommandResponse::Applied { etag, value }
    }

    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        CommandResponse::Rejected {
            reason,
            message: message.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, CommandResponse::Applied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_wire_shape_is_stable() {
        let command = Command::new(
            CommandKind::RotateKeys,
            Some("acme"),
            "",
            json!({"grace_seconds": 5}),
            1_700_000_000,
        )
        .with_if_match(Some("abc".to_string()));
        let encoded = serde_json::to_value(&command).expect("encode");
        assert_eq!(encoded["kind"], "rotate_keys");
        assert_eq!(encoded["tenant"], "acme");
        assert_eq!(encoded["if_match"], "abc");
        let decoded: Command = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, command);
    }

    #[test]
    fn responses_are_tagged() {
        let rejected = CommandResponse::rejected(RejectReason::PreconditionFailed, "etag mismatch");
        let encoded = serde_json::to_value(&rejected).expect("encode");
        assert_eq!(encoded["outcome"], "rejected");
        assert_eq!(encoded["reason"], "precondition_failed");
        assert!(!rejected.is_applied());
        assert!(CommandResponse::noop().is_applied());
    }

    #[test]
    fn delete_kinds_are_flagged() {
        assert!(CommandKind::DeleteScope.is_delete());
        assert!(!CommandKind::RotateKeys.is_delete());
        assert_eq!(CommandKind::UpsertAdmin.as_str(), "upsert_admin");
    }
}
