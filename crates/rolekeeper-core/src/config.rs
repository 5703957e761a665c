//! Rolekeeper configuration system (TOML).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RolekeeperError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolekeeperConfig {
    pub platform: PlatformConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub destinations: DestinationsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub translate: Option<TranslateConfig>,
}

impl RolekeeperConfig {
    /// Load config from a specific path. Malformed configuration is fatal:
    /// the caller gets an error and performs no partial startup.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RolekeeperError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RolekeeperError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config path (~/.rolekeeper/config.toml).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rolekeeper")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.platform.bot_token.is_empty() {
            return Err(RolekeeperError::Config("platform.bot_token is required".into()));
        }
        if self.platform.community_id.is_empty() {
            return Err(RolekeeperError::Config("platform.community_id is required".into()));
        }
        if self.rules.default_role.is_empty() {
            return Err(RolekeeperError::Config("rules.default_role is required".into()));
        }
        if self.scheduler.check_interval_secs == 0 {
            return Err(RolekeeperError::Config(
                "scheduler.check_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Group-platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    pub bot_token: String,
    /// The managed community (guild) id.
    pub community_id: String,
}

/// Rule table sources: the rule file plus role-name lists resolved against
/// the platform's role listing at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_rule_file")]
    pub file: String,
    pub default_role: String,
    /// Role added to newcomers; empty disables the behavior.
    #[serde(default)]
    pub joining_role: String,
    #[serde(default)]
    pub authorized_roles: Vec<String>,
    #[serde(default)]
    pub forbidden_roles: Vec<String>,
    #[serde(default)]
    pub ignored_roles: Vec<String>,
    /// Count filter mode: "" (no filter), "list", "prefix" or "command".
    #[serde(default)]
    pub count_filter: String,
    #[serde(default)]
    pub count_filter_roles: Vec<String>,
}

fn default_rule_file() -> String {
    "rolekeeper.rules".into()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            file: default_rule_file(),
            default_role: String::new(),
            joining_role: String::new(),
            authorized_roles: vec![],
            forbidden_roles: vec![],
            ignored_roles: vec![],
            count_filter: String::new(),
            count_filter_roles: vec![],
        }
    }
}

/// Names under which the built-in commands are registered on the platform.
/// An empty name disables the command. Role-assignment commands come from
/// the rule file instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_cmd_apply")]
    pub apply: String,
    #[serde(default = "default_cmd_clean")]
    pub clean: String,
    #[serde(default = "default_cmd_reset")]
    pub reset: String,
    #[serde(default = "default_cmd_reset_all")]
    pub reset_all: String,
    #[serde(default = "default_cmd_count")]
    pub count: String,
    #[serde(default = "default_cmd_save_activity")]
    pub save_activity: String,
}

fn default_cmd_apply() -> String {
    "apply".into()
}
fn default_cmd_clean() -> String {
    "clean".into()
}
fn default_cmd_reset() -> String {
    "reset".into()
}
fn default_cmd_reset_all() -> String {
    "resetall".into()
}
fn default_cmd_count() -> String {
    "count".into()
}
fn default_cmd_save_activity() -> String {
    "saveactivity".into()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            apply: default_cmd_apply(),
            clean: default_cmd_clean(),
            reset: default_cmd_reset(),
            reset_all: default_cmd_reset_all(),
            count: default_cmd_count(),
            save_activity: default_cmd_save_activity(),
        }
    }
}

/// Reply and report templates. `{{cmd}}` and `{{numError}}` placeholders are
/// substituted at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_msg_ok")]
    pub ok: String,
    #[serde(default = "default_msg_unauthorized")]
    pub unauthorized: String,
    #[serde(default = "default_msg_global_error")]
    pub global_error: String,
    #[serde(default = "default_msg_partial_error")]
    pub partial_error: String,
    #[serde(default = "default_msg_ended")]
    pub ended: String,
    #[serde(default = "default_msg_count")]
    pub count: String,
    #[serde(default = "default_msg_owner")]
    pub owner: String,
    #[serde(default = "default_msg_updated")]
    pub updated: String,
}

fn default_msg_ok() -> String {
    "Command {{cmd}} accepted".into()
}
fn default_msg_unauthorized() -> String {
    "You are not allowed to use this command".into()
}
fn default_msg_global_error() -> String {
    "Command {{cmd}} failed".into()
}
fn default_msg_partial_error() -> String {
    "Command {{cmd}} partial error: {{numError}}".into()
}
fn default_msg_ended() -> String {
    "Command {{cmd}} ended".into()
}
fn default_msg_count() -> String {
    "Role counts:".into()
}
fn default_msg_owner() -> String {
    "The community owner is not managed".into()
}
fn default_msg_updated() -> String {
    "Display name updated".into()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            ok: default_msg_ok(),
            unauthorized: default_msg_unauthorized(),
            global_error: default_msg_global_error(),
            partial_error: default_msg_partial_error(),
            ended: default_msg_ended(),
            count: default_msg_count(),
            owner: default_msg_owner(),
            updated: default_msg_updated(),
        }
    }
}

/// Output destination (channel) ids. An empty id disables the related
/// messages; the dispatcher never creates a worker for it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DestinationsConfig {
    /// Live display-name update notifications.
    #[serde(default)]
    pub updates: String,
    /// Bulk command completion reports.
    #[serde(default)]
    pub commands: String,
    /// Feed items.
    #[serde(default)]
    pub news: String,
    /// Event reminders.
    #[serde(default)]
    pub reminders: String,
    /// Activity snapshot files.
    #[serde(default)]
    pub activity: String,
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Platform message size limit; merged text+file deliveries above this
    /// fall back to a file attachment with caption.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

fn default_message_limit() -> usize {
    2000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message_limit: default_message_limit(),
        }
    }
}

/// Single-timer fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Extra lookback applied to the first poll window at startup.
    #[serde(default)]
    pub initial_backward_secs: u64,
}

fn default_check_interval() -> u64 {
    600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            initial_backward_secs: 0,
        }
    }
}

/// One polled feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Link filter rule: empty, `accept:<regex>` or `reject:<regex>`.
    #[serde(default)]
    pub link_rule: String,
    /// Append a translated item summary under the link.
    #[serde(default)]
    pub translate_summary: bool,
}

/// Event reminder settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReminderConfig {
    /// Minutes before event start at which a reminder fires.
    #[serde(default)]
    pub delays_mins: Vec<i64>,
    #[serde(default)]
    pub text: String,
}

/// Activity tracking and CSV snapshotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Snapshot file path; empty disables tracking.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub include_last_activity: bool,
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".into()
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            date_format: default_date_format(),
            include_last_activity: false,
        }
    }
}

/// DeepL-compatible translation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    pub api_url: String,
    pub token: String,
    #[serde(default)]
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default = "default_translate_error")]
    pub message_error: String,
    #[serde(default = "default_translate_limit")]
    pub message_limit: String,
}

fn default_translate_error() -> String {
    "(translation unavailable)".into()
}
fn default_translate_limit() -> String {
    "(translation quota exhausted)".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [platform]
            bot_token = "token"
            community_id = "42"

            [rules]
            default_role = "Member"

            [[feeds]]
            url = "https://example.org/rss"
            link_rule = "reject:^https://example.org/ads"
        "#;

        let config: RolekeeperConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.platform.community_id, "42");
        assert_eq!(config.rules.default_role, "Member");
        assert_eq!(config.feeds.len(), 1);
        assert!(!config.feeds[0].translate_summary);
        assert_eq!(config.dispatch.message_limit, 2000);
        assert_eq!(config.scheduler.check_interval_secs, 600);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let toml_str = r#"
            [platform]
            bot_token = "token"
            community_id = "42"

            [rules]
            default_role = "Member"

            [scheduler]
            check_interval_secs = 0
        "#;
        let config: RolekeeperConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_token() {
        let config = RolekeeperConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_is_fatal() {
        assert!(RolekeeperConfig::load_from(Path::new("/nonexistent/rk.toml")).is_err());
    }
}
