//! # Rolekeeper Engine
//! Deterministic per-member reconciliation, the in-flight guard that lets
//! live update events and bulk commands interleave safely, the command
//! registry and the bulk-operation orchestrator.

pub mod cache;
pub mod guard;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;

pub use cache::BoundedRecencySet;
pub use guard::ConcurrencyGuard;
pub use orchestrator::Orchestrator;
pub use reconcile::{Reconciliation, RoleAction, reconcile};
pub use registry::{CommandKind, CommandRegistry, CommandSpec};
