//! Boundary traits implemented by the platform and translation adapters.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Member, RoleInfo, ScheduledEvent};

/// The group-chat platform surface the engine relies on.
///
/// Implementations are plain I/O wrappers: no retries, no rate limiting, no
/// internal state machine. All mutating calls are per-member and independent.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<RoleInfo>>;

    async fn list_members(&self) -> Result<Vec<Member>>;

    async fn get_member(&self, member_id: &str) -> Result<Member>;

    async fn rename_member(&self, member_id: &str, name: &str) -> Result<()>;

    async fn add_role(&self, member_id: &str, role_id: &str) -> Result<()>;

    async fn remove_role(&self, member_id: &str, role_id: &str) -> Result<()>;

    async fn send_message(&self, destination: &str, text: &str) -> Result<()>;

    /// Send a file attachment, optionally with a text caption.
    async fn send_file(
        &self,
        destination: &str,
        caption: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<()>;

    async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>>;
}

/// Translation provider. Failures never surface as errors: implementations
/// substitute a configured error or quota-limit message instead.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> String;
}
