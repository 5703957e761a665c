//! Prefix rule file parsing and the immutable rule table.
//!
//! The rule file is line oriented: blank lines and lines starting with `#`
//! are skipped, every other line is `roleName:prefix[:commandName]`. A rule
//! carrying a command name registers a role-assignment command; a rule
//! without one marks the role *special* (its prefix always overrides a
//! previously applied non-special prefix).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Result, RolekeeperError};
use crate::types::{RoleId, RoleSet};

/// One parsed line of the rule file. The stored prefix always carries a
/// trailing space so it can be prepended to a name directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRule {
    pub role_name: String,
    pub prefix: String,
    pub command: Option<String>,
}

impl PrefixRule {
    pub fn is_special(&self) -> bool {
        self.command.is_none()
    }
}

/// Parse the rule file at `path`. Malformed content is fatal.
pub fn load_rule_file(path: &Path) -> Result<Vec<PrefixRule>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RolekeeperError::Rules(format!("Cannot read rule file: {e}")))?;
    parse_rules(&content)
}

/// Parse rule file content.
pub fn parse_rules(content: &str) -> Result<Vec<PrefixRule>> {
    let mut rules = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(3, ':');
        let role_name = parts.next().unwrap_or_default().trim();
        let Some(prefix) = parts.next() else {
            continue;
        };
        if role_name.is_empty() {
            continue;
        }
        let command = match parts.next() {
            Some(cmd) => {
                let cmd = cmd.trim();
                if cmd.is_empty() {
                    return Err(RolekeeperError::Rules(format!(
                        "Empty command name for role '{role_name}'"
                    )));
                }
                Some(cmd.to_string())
            }
            None => None,
        };
        rules.push(PrefixRule {
            role_name: role_name.to_string(),
            prefix: format!("{} ", prefix.trim()),
            command,
        });
    }
    Ok(rules)
}

/// Immutable role → prefix rule table. Built once at startup and shared
/// read-only across every task; never mutated afterwards.
#[derive(Debug, Default)]
pub struct RuleTable {
    default_role: RoleId,
    prefix_by_role: HashMap<RoleId, String>,
    /// Role ids with a prefix, in rule-file registration order. Reconciliation
    /// scans in this order, which pins the tie-break between two special
    /// prefixed roles held simultaneously: the last registered special wins.
    prefix_order: Vec<RoleId>,
    prefixes: Vec<String>,
    special: HashSet<RoleId>,
    forbidden: HashSet<RoleId>,
    ignored: HashSet<RoleId>,
    authorized: HashSet<RoleId>,
    command_roles: HashSet<RoleId>,
    display_names: HashMap<RoleId, String>,
}

impl RuleTable {
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::default()
    }

    pub fn default_role(&self) -> &RoleId {
        &self.default_role
    }

    pub fn prefix_of(&self, role_id: &str) -> Option<&str> {
        self.prefix_by_role.get(role_id).map(String::as_str)
    }

    /// Prefixed role ids in registration order.
    pub fn prefix_roles(&self) -> &[RoleId] {
        &self.prefix_order
    }

    pub fn is_special(&self, role_id: &str) -> bool {
        self.special.contains(role_id)
    }

    pub fn is_forbidden(&self, role_id: &str) -> bool {
        self.forbidden.contains(role_id)
    }

    pub fn holds_forbidden(&self, roles: &RoleSet) -> bool {
        roles.iter().any(|r| self.forbidden.contains(r))
    }

    pub fn holds_ignored(&self, roles: &RoleSet) -> bool {
        roles.iter().any(|r| self.ignored.contains(r))
    }

    pub fn is_authorized(&self, roles: &RoleSet) -> bool {
        roles.iter().any(|r| self.authorized.contains(r))
    }

    /// Administrative members (forbidden, ignored or authorized roles) are
    /// excluded from activity tracking.
    pub fn is_administrative(&self, roles: &RoleSet) -> bool {
        roles.iter().any(|r| {
            self.forbidden.contains(r) || self.ignored.contains(r) || self.authorized.contains(r)
        })
    }

    /// Whether `role_id` can be assigned through a registered command.
    pub fn is_command_role(&self, role_id: &str) -> bool {
        self.command_roles.contains(role_id)
    }

    pub fn display_name<'a>(&'a self, role_id: &'a str) -> &'a str {
        self.display_names
            .get(role_id)
            .map(String::as_str)
            .unwrap_or(role_id)
    }

    /// Remove the first recognized prefix from `name`, if any.
    pub fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        for prefix in &self.prefixes {
            if let Some(stripped) = name.strip_prefix(prefix.as_str()) {
                return stripped;
            }
        }
        name
    }
}

/// Incremental construction of a [`RuleTable`]; used once at startup after
/// rule-file role names have been resolved against the platform's role list.
#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    table: RuleTable,
}

impl RuleTableBuilder {
    pub fn default_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.default_role = role_id.into();
        self
    }

    /// Register a prefixed role. Registration order is significant: it is the
    /// reconciliation scan order.
    pub fn prefix(mut self, role_id: impl Into<RoleId>, prefix: impl Into<String>) -> Self {
        let role_id = role_id.into();
        let prefix = prefix.into();
        self.table.prefixes.push(prefix.clone());
        self.table.prefix_order.push(role_id.clone());
        self.table.prefix_by_role.insert(role_id, prefix);
        self
    }

    pub fn special(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.special.insert(role_id.into());
        self
    }

    pub fn forbidden(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.forbidden.insert(role_id.into());
        self
    }

    pub fn ignored(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.ignored.insert(role_id.into());
        self
    }

    pub fn authorized(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.authorized.insert(role_id.into());
        self
    }

    pub fn command_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.table.command_roles.insert(role_id.into());
        self
    }

    pub fn display_name(mut self, role_id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        self.table.display_names.insert(role_id.into(), name.into());
        self
    }

    pub fn build(self) -> Result<RuleTable> {
        if self.table.default_role.is_empty() {
            return Err(RolekeeperError::Rules("Default role is required".into()));
        }
        Ok(self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules_basic() {
        let content = "\n# managed prefixes\nCaptain:Cpt\nSailor:Slr:sailor\n\n";
        let rules = parse_rules(content).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].role_name, "Captain");
        assert_eq!(rules[0].prefix, "Cpt ");
        assert!(rules[0].is_special());
        assert_eq!(rules[1].command.as_deref(), Some("sailor"));
        assert!(!rules[1].is_special());
    }

    #[test]
    fn test_parse_rules_empty_command_is_fatal() {
        assert!(parse_rules("Captain:Cpt:  ").is_err());
    }

    #[test]
    fn test_parse_rules_skips_unprefixed_lines() {
        let rules = parse_rules("JustARoleName\n:NoName\n").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_strip_prefix_first_match_wins() {
        let table = RuleTable::builder()
            .default_role("d")
            .prefix("a", "Cpt ")
            .prefix("b", "Slr ")
            .build()
            .unwrap();
        assert_eq!(table.strip_prefix("Cpt Alice"), "Alice");
        assert_eq!(table.strip_prefix("Slr Bob"), "Bob");
        assert_eq!(table.strip_prefix("Charlie"), "Charlie");
    }

    #[test]
    fn test_build_requires_default_role() {
        assert!(RuleTable::builder().build().is_err());
    }

    #[test]
    fn test_load_rule_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Captain:Cpt").unwrap();
        let rules = load_rule_file(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
    }
}
