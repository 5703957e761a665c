//! Domain types shared across the workspace.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable platform identifier of a role.
pub type RoleId = String;

/// A member's role membership. Ordering is irrelevant; the rule table decides
/// the scan order during reconciliation.
pub type RoleSet = HashSet<RoleId>;

/// A community member, supplied fresh per platform call. The engine never
/// caches member state across invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: RoleSet,
}

impl Member {
    /// The name currently shown for this member: the nickname when set,
    /// the account username otherwise.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// A role as listed by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
}

/// A scheduled community event, used by the reminder scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
}

/// A message queued for a destination's delivery worker.
///
/// Consumed exactly once by the worker. The text/file combination decides the
/// delivery shape: text only, file only (with optional fallback text on
/// failure), merged text when `allow_merge` is set and the result fits under
/// the platform size limit, or text caption plus file attachment.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub text: String,
    pub file_name: String,
    pub file_data: String,
    /// Sent as a follow-up text when a file-only delivery fails.
    pub error_fallback: String,
    pub allow_merge: bool,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn file(
        name: impl Into<String>,
        data: impl Into<String>,
        error_fallback: impl Into<String>,
    ) -> Self {
        Self {
            file_name: name.into(),
            file_data: data.into(),
            error_fallback: error_fallback.into(),
            ..Self::default()
        }
    }
}

/// A single observed member activity (message or voice presence).
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub member_id: String,
    pub timestamp: DateTime<Utc>,
    pub vocal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_nick() {
        let member = Member {
            id: "1".into(),
            username: "acct".into(),
            nick: Some("Cpt Nick".into()),
            roles: RoleSet::new(),
        };
        assert_eq!(member.display_name(), "Cpt Nick");
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let member = Member {
            id: "1".into(),
            username: "acct".into(),
            nick: Some(String::new()),
            roles: RoleSet::new(),
        };
        assert_eq!(member.display_name(), "acct");
    }
}
