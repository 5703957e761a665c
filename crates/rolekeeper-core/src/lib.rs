//! # Rolekeeper Core
//! Shared foundation: error type, configuration, domain types, the rule table
//! and the traits the rest of the workspace plugs into.

pub mod config;
pub mod error;
pub mod rules;
pub mod traits;
pub mod types;

pub use error::{Result, RolekeeperError};
