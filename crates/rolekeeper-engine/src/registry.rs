//! Tagged command registry.
//!
//! Command names map to a descriptor struct rather than captured closures,
//! so dynamically registered role-assignment commands and the fixed bulk
//! commands share one dispatch path.

use std::collections::HashMap;

use rolekeeper_core::types::RoleId;

/// What a registered command does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Reconcile every member's prefix and default role (bulk, async).
    ApplyAll,
    /// Strip managed prefixes from every member's name (bulk, async).
    CleanAll,
    /// Reset the invoking member to the default role (sync).
    ResetOne,
    /// Reset every member to the default role (bulk, async).
    ResetAll,
    /// Tally role membership across all members (read-only, bypasses the
    /// in-flight guard).
    Count,
    /// Flush the activity snapshot on demand (sync).
    SaveActivity,
    /// Assign a rule-registered role to the invoking member (sync).
    AssignRole { role_id: RoleId },
}

/// A registered command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub kind: CommandKind,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
        }
    }
}

/// Name → descriptor lookup, preserving registration order for platform
/// command creation and shutdown deregistration.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    by_name: HashMap<String, usize>,
    specs: Vec<CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. A spec with an empty name is silently skipped,
    /// which lets optional commands be disabled through configuration.
    pub fn register(&mut self, spec: CommandSpec) {
        if spec.name.is_empty() {
            return;
        }
        self.by_name.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CommandRegistry::new();
        registry.register(CommandSpec::new("apply", "Apply prefixes", CommandKind::ApplyAll));
        registry.register(CommandSpec::new(
            "sailor",
            "Become a sailor",
            CommandKind::AssignRole { role_id: "7".into() },
        ));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("apply").unwrap().kind, CommandKind::ApplyAll);
        assert!(matches!(
            &registry.get("sailor").unwrap().kind,
            CommandKind::AssignRole { role_id } if role_id == "7"
        ));
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_empty_name_is_skipped() {
        let mut registry = CommandRegistry::new();
        registry.register(CommandSpec::new("", "disabled", CommandKind::Count));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_iteration_preserves_registration_order() {
        let mut registry = CommandRegistry::new();
        registry.register(CommandSpec::new("b", "", CommandKind::Count));
        registry.register(CommandSpec::new("a", "", CommandKind::ApplyAll));
        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }
}
