//! The per-member prefix reconciliation function.
//!
//! Pure computation: (current name, role set, rule table) in, new name and
//! role action out. All platform mutations happen in the caller.

use rolekeeper_core::rules::RuleTable;
use rolekeeper_core::types::{RoleId, RoleSet};

/// The role-membership delta the caller must apply after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAction {
    None,
    /// The member has neither the default role nor any prefixed role.
    AddDefault,
    /// The member holds both the default role and a prefixed role.
    RemoveDefault,
    /// The member holds a forbidden role: management is withdrawn entirely.
    RemoveAllManagedRoles,
}

/// Result of one reconciliation pass. Created fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub new_name: String,
    /// The prefixed role whose prefix ended up applied, if any.
    pub used_role: Option<RoleId>,
    pub action: RoleAction,
}

/// Compute the member's correct display name and role action.
///
/// Any recognized prefix is stripped from `name` first. A forbidden role
/// short-circuits everything: the stripped name is returned together with
/// [`RoleAction::RemoveAllManagedRoles`]. Otherwise prefixed roles are
/// scanned in the rule table's registration order; the first held one is
/// applied, and a later *special* role overwrites a previously applied
/// prefix. Scanning in registration order makes the outcome deterministic
/// when two special prefixed roles are held at once: the last registered
/// special wins.
pub fn reconcile(name: &str, roles: &RoleSet, rules: &RuleTable) -> Reconciliation {
    let stripped = rules.strip_prefix(name);

    if rules.holds_forbidden(roles) {
        return Reconciliation {
            new_name: stripped.to_string(),
            used_role: None,
            action: RoleAction::RemoveAllManagedRoles,
        };
    }

    let has_default = roles.contains(rules.default_role());
    let mut has_prefix = false;
    let mut applied = false;
    let mut used_role = None;
    let mut new_name = stripped.to_string();

    for role_id in rules.prefix_roles() {
        if !roles.contains(role_id) {
            continue;
        }
        has_prefix = true;
        if !applied || rules.is_special(role_id) {
            applied = true;
            // stored prefixes already end with a space
            new_name = format!("{}{stripped}", rules.prefix_of(role_id).unwrap_or_default());
            used_role = Some(role_id.clone());
        }
    }

    let action = if has_default && has_prefix {
        RoleAction::RemoveDefault
    } else if !has_default && !has_prefix {
        RoleAction::AddDefault
    } else {
        RoleAction::None
    };

    Reconciliation {
        new_name,
        used_role,
        action,
    }
}
