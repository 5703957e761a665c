//! Bulk-operation orchestrator.
//!
//! Authorizes and executes the registered commands: whole-community passes
//! run asynchronously behind an immediate acknowledgment, single-member
//! operations reply synchronously, count bypasses the in-flight guard
//! entirely. Per-member failures are counted, never propagated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use rolekeeper_core::config::MessagesConfig;
use rolekeeper_core::rules::RuleTable;
use rolekeeper_core::traits::Platform;
use rolekeeper_core::types::{Member, OutboundMessage, RoleId};

use crate::guard::ConcurrencyGuard;
use crate::reconcile::{RoleAction, reconcile};
use crate::registry::{CommandKind, CommandSpec};

pub const CMD_PLACEHOLDER: &str = "{{cmd}}";
pub const NUM_ERROR_PLACEHOLDER: &str = "{{numError}}";

/// Build a `name = value` listing under `base`, sorted by name.
pub fn build_name_value_list(
    base: &str,
    pairs: impl IntoIterator<Item = (String, String)>,
) -> String {
    let mut pairs: Vec<_> = pairs.into_iter().collect();
    pairs.sort();

    let mut out = String::from(base);
    for (name, value) in pairs {
        out.push('\n');
        out.push_str(&name);
        out.push_str(" = ");
        out.push_str(&value);
    }
    out
}

/// Tally role occurrences across members, optionally restricted to a filter
/// set.
pub fn tally_roles(
    members: &[Member],
    filter: Option<&HashSet<RoleId>>,
) -> HashMap<RoleId, usize> {
    let mut counts = HashMap::new();
    for member in members {
        for role_id in &member.roles {
            if filter.is_none_or(|f| f.contains(role_id)) {
                *counts.entry(role_id.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

enum BulkKind {
    Apply,
    Clean,
    Reset,
}

/// Command authorization and execution over the reconciliation engine.
pub struct Orchestrator {
    platform: Arc<dyn Platform>,
    rules: Arc<RuleTable>,
    guard: Arc<ConcurrencyGuard>,
    owner_id: String,
    messages: MessagesConfig,
    /// Bulk completion reports. `None` drops the reports.
    command_reports: Option<mpsc::Sender<OutboundMessage>>,
    /// Live display-name update notifications.
    update_reports: Option<mpsc::Sender<OutboundMessage>>,
    /// Role filter for the count operation.
    count_filter: Option<HashSet<RoleId>>,
    /// On-demand activity snapshot trigger.
    activity_flush: Option<mpsc::Sender<()>>,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn Platform>,
        rules: Arc<RuleTable>,
        guard: Arc<ConcurrencyGuard>,
        owner_id: impl Into<String>,
        messages: MessagesConfig,
    ) -> Self {
        Self {
            platform,
            rules,
            guard,
            owner_id: owner_id.into(),
            messages,
            command_reports: None,
            update_reports: None,
            count_filter: None,
            activity_flush: None,
        }
    }

    pub fn with_command_reports(mut self, sender: mpsc::Sender<OutboundMessage>) -> Self {
        self.command_reports = Some(sender);
        self
    }

    pub fn with_update_reports(mut self, sender: mpsc::Sender<OutboundMessage>) -> Self {
        self.update_reports = Some(sender);
        self
    }

    pub fn with_count_filter(mut self, filter: HashSet<RoleId>) -> Self {
        self.count_filter = Some(filter);
        self
    }

    pub fn with_activity_flush(mut self, sender: mpsc::Sender<()>) -> Self {
        self.activity_flush = Some(sender);
        self
    }

    /// Handle a command invocation; the returned string is the immediate
    /// reply. Whole-community operations only acknowledge here and report
    /// their outcome through the commands destination once finished.
    pub async fn handle_command(self: &Arc<Self>, spec: &CommandSpec, invoker: &Member) -> String {
        match &spec.kind {
            CommandKind::ApplyAll => self.accept_bulk(spec, invoker, BulkKind::Apply),
            CommandKind::CleanAll => self.accept_bulk(spec, invoker, BulkKind::Clean),
            CommandKind::ResetAll => self.accept_bulk(spec, invoker, BulkKind::Reset),
            CommandKind::ResetOne => {
                let default_role = self.rules.default_role().clone();
                self.assign_role_reply(spec, invoker, &default_role).await
            }
            CommandKind::AssignRole { role_id } => {
                self.assign_role_reply(spec, invoker, role_id).await
            }
            CommandKind::Count => self.count_reply(spec, invoker).await,
            CommandKind::SaveActivity => self.save_activity_reply(spec, invoker).await,
        }
    }

    /// Reconcile a member after a live platform update event. Dropped when
    /// the member is already in-flight: the concurrent pass will observe the
    /// final state.
    pub async fn handle_member_update(&self, member: &Member) {
        if member.id == self.owner_id {
            return;
        }
        if !self.guard.start_processing(&member.id) {
            return;
        }
        self.apply_member(member, true).await;
        self.guard.stop_processing(&member.id);
    }

    /// One reconciliation pass over all members, as run at startup. Returns
    /// the per-member failure count.
    pub async fn apply_all_silent(&self) -> rolekeeper_core::Result<usize> {
        let members = self.platform.list_members().await?;
        Ok(self.process_members(&members, &BulkKind::Apply).await)
    }

    fn accept_bulk(self: &Arc<Self>, spec: &CommandSpec, invoker: &Member, kind: BulkKind) -> String {
        if !self.rules.is_authorized(&invoker.roles) {
            return self.fill(&self.messages.unauthorized, &spec.name);
        }

        let orchestrator = Arc::clone(self);
        let cmd_name = spec.name.clone();
        tokio::spawn(async move {
            orchestrator.run_bulk(cmd_name, kind).await;
        });

        self.fill(&self.messages.ok, &spec.name)
    }

    async fn run_bulk(self: Arc<Self>, cmd_name: String, kind: BulkKind) {
        let report = match self.platform.list_members().await {
            Ok(members) => {
                let errors = self.process_members(&members, &kind).await;
                if errors == 0 {
                    self.fill(&self.messages.ended, &cmd_name)
                } else {
                    self.fill_errors(&self.messages.partial_error, &cmd_name, errors)
                }
            }
            Err(e) => {
                tracing::error!("Cannot retrieve members for {cmd_name}: {e}");
                self.fill(&self.messages.global_error, &cmd_name)
            }
        };

        if let Some(sender) = &self.command_reports
            && sender.send(OutboundMessage::text(report)).await.is_err()
        {
            tracing::warn!("Command report dropped: delivery worker gone");
        }
    }

    async fn process_members(&self, members: &[Member], kind: &BulkKind) -> usize {
        let mut errors = 0;
        for member in members {
            // skip members already in-flight, no retry
            if !self.guard.start_processing(&member.id) {
                continue;
            }
            errors += match kind {
                BulkKind::Apply => self.apply_member(member, false).await,
                BulkKind::Clean => self.clean_member(member).await,
                BulkKind::Reset => self.reset_member(member).await,
            };
            self.guard.stop_processing(&member.id);
        }
        errors
    }

    /// Reconcile one member and apply the outcome, returning the failure
    /// count. `notify` emits an update notification on a successful rename.
    async fn apply_member(&self, member: &Member, notify: bool) -> usize {
        if member.id == self.owner_id || self.rules.holds_ignored(&member.roles) {
            return 0;
        }

        let outcome = reconcile(member.display_name(), &member.roles, &self.rules);
        let mut errors = 0;

        match outcome.action {
            RoleAction::None => {}
            RoleAction::AddDefault => {
                if let Err(e) = self
                    .platform
                    .add_role(&member.id, self.rules.default_role())
                    .await
                {
                    tracing::warn!("Role addition failed for {}: {e}", member.id);
                    errors += 1;
                }
            }
            RoleAction::RemoveDefault | RoleAction::RemoveAllManagedRoles => {
                if let Err(e) = self
                    .platform
                    .remove_role(&member.id, self.rules.default_role())
                    .await
                {
                    tracing::warn!("Role removal failed for {}: {e}", member.id);
                    errors += 1;
                }
            }
        }

        if outcome.new_name != member.display_name() {
            match self
                .platform
                .rename_member(&member.id, &outcome.new_name)
                .await
            {
                Ok(()) => {
                    if notify && let Some(sender) = &self.update_reports {
                        let text = format!("{} {}", self.messages.updated, outcome.new_name);
                        let _ = sender.send(OutboundMessage::text(text)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Rename failed for {}: {e}", member.id);
                    errors += 1;
                }
            }
        }
        errors
    }

    /// Strip any managed prefix from the member's display name.
    async fn clean_member(&self, member: &Member) -> usize {
        if member.id == self.owner_id {
            return 0;
        }
        let stripped = self.rules.strip_prefix(member.display_name());
        if stripped == member.display_name() {
            return 0;
        }
        match self.platform.rename_member(&member.id, stripped).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::warn!("Rename failed for {}: {e}", member.id);
                1
            }
        }
    }

    /// Put the member back on the default role.
    async fn reset_member(&self, member: &Member) -> usize {
        if member.id == self.owner_id
            || self.rules.holds_forbidden(&member.roles)
            || self.rules.holds_ignored(&member.roles)
        {
            return 0;
        }
        let default_role = self.rules.default_role().clone();
        self.assign_role(member, &default_role).await
    }

    /// Swap the member onto `role_id`: drop other command-assignable roles,
    /// add the target when missing, then re-fetch and reconcile.
    async fn assign_role(&self, member: &Member, role_id: &str) -> usize {
        let mut errors = 0;
        let mut to_add = true;

        for held in &member.roles {
            if held == role_id {
                to_add = false;
                continue;
            }
            if self.rules.is_command_role(held)
                && let Err(e) = self.platform.remove_role(&member.id, held).await
            {
                tracing::warn!("Command role removal failed for {}: {e}", member.id);
                errors += 1;
            }
        }

        if to_add && let Err(e) = self.platform.add_role(&member.id, role_id).await {
            tracing::warn!("Role addition failed for {}: {e}", member.id);
            errors += 1;
        }

        match self.platform.get_member(&member.id).await {
            Ok(fresh) => errors += self.apply_member(&fresh, false).await,
            Err(e) => {
                tracing::warn!("Cannot re-fetch member {}: {e}", member.id);
                errors += 1;
            }
        }
        errors
    }

    async fn assign_role_reply(&self, spec: &CommandSpec, invoker: &Member, role_id: &str) -> String {
        if self.rules.holds_forbidden(&invoker.roles) {
            return self.fill(&self.messages.unauthorized, &spec.name);
        }
        if invoker.id == self.owner_id {
            return self.messages.owner.clone();
        }
        if !self.guard.start_processing(&invoker.id) {
            // a concurrent pass owns this member; skipped, not retried
            return self.fill(&self.messages.ok, &spec.name);
        }

        let errors = self.assign_role(invoker, role_id).await;
        self.guard.stop_processing(&invoker.id);

        if errors == 0 {
            self.fill(&self.messages.ok, &spec.name)
        } else {
            self.fill_errors(&self.messages.partial_error, &spec.name, errors)
        }
    }

    async fn count_reply(&self, spec: &CommandSpec, invoker: &Member) -> String {
        if !self.rules.is_authorized(&invoker.roles) {
            return self.fill(&self.messages.unauthorized, &spec.name);
        }

        // read-only: the in-flight guard is bypassed
        match self.platform.list_members().await {
            Ok(members) => {
                let counts = tally_roles(&members, self.count_filter.as_ref());
                build_name_value_list(
                    &self.messages.count,
                    counts.into_iter().map(|(role_id, count)| {
                        (self.rules.display_name(&role_id).to_string(), count.to_string())
                    }),
                )
            }
            Err(e) => {
                tracing::error!("Cannot retrieve members for {}: {e}", spec.name);
                self.fill(&self.messages.global_error, &spec.name)
            }
        }
    }

    async fn save_activity_reply(&self, spec: &CommandSpec, invoker: &Member) -> String {
        if !self.rules.is_authorized(&invoker.roles) {
            return self.fill(&self.messages.unauthorized, &spec.name);
        }
        match &self.activity_flush {
            Some(sender) if sender.send(()).await.is_ok() => {
                self.fill(&self.messages.ok, &spec.name)
            }
            _ => self.fill(&self.messages.global_error, &spec.name),
        }
    }

    fn fill(&self, template: &str, cmd_name: &str) -> String {
        template.replace(CMD_PLACEHOLDER, cmd_name)
    }

    fn fill_errors(&self, template: &str, cmd_name: &str, errors: usize) -> String {
        self.fill(template, cmd_name)
            .replace(NUM_ERROR_PLACEHOLDER, &errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use std::sync::Mutex;

    use rolekeeper_core::error::{Result, RolekeeperError};
    use rolekeeper_core::types::{RoleInfo, ScheduledEvent};

    #[derive(Default)]
    struct MockPlatform {
        members: Vec<Member>,
        fail_renames_for: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockPlatform {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Platform for MockPlatform {
        async fn list_roles(&self) -> Result<Vec<RoleInfo>> {
            Ok(vec![])
        }

        async fn list_members(&self) -> Result<Vec<Member>> {
            self.record("list_members".into());
            Ok(self.members.clone())
        }

        async fn get_member(&self, member_id: &str) -> Result<Member> {
            self.members
                .iter()
                .find(|m| m.id == member_id)
                .cloned()
                .ok_or_else(|| RolekeeperError::Platform("unknown member".into()))
        }

        async fn rename_member(&self, member_id: &str, name: &str) -> Result<()> {
            self.record(format!("rename {member_id} {name}"));
            if self.fail_renames_for.contains(member_id) {
                return Err(RolekeeperError::Platform("rename refused".into()));
            }
            Ok(())
        }

        async fn add_role(&self, member_id: &str, role_id: &str) -> Result<()> {
            self.record(format!("add_role {member_id} {role_id}"));
            Ok(())
        }

        async fn remove_role(&self, member_id: &str, role_id: &str) -> Result<()> {
            self.record(format!("remove_role {member_id} {role_id}"));
            Ok(())
        }

        async fn send_message(&self, _destination: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn send_file(
            &self,
            _destination: &str,
            _caption: &str,
            _file_name: &str,
            _data: &[u8],
        ) -> Result<()> {
            Ok(())
        }

        async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>> {
            Ok(vec![])
        }
    }

    fn rules() -> Arc<RuleTable> {
        Arc::new(
            RuleTable::builder()
                .default_role("D")
                .prefix("A", "Cpt ")
                .command_role("A")
                .display_name("A", "Captain Cpt")
                .display_name("D", "Member")
                .authorized("ADMIN")
                .forbidden("F")
                .build()
                .unwrap(),
        )
    }

    fn member(id: &str, name: &str, role_ids: &[&str]) -> Member {
        Member {
            id: id.into(),
            username: name.into(),
            nick: None,
            roles: role_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn orchestrator(platform: Arc<MockPlatform>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            platform,
            rules(),
            Arc::new(ConcurrencyGuard::new()),
            "owner",
            MessagesConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_unauthorized_bulk_does_no_work() {
        let platform = Arc::new(MockPlatform::default());
        let orch = orchestrator(Arc::clone(&platform));
        let spec = CommandSpec::new("apply", "", CommandKind::ApplyAll);

        let reply = orch.handle_command(&spec, &member("1", "alice", &[])).await;
        assert_eq!(reply, MessagesConfig::default().unauthorized);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_apply_reports_partial_errors() {
        let mut platform = MockPlatform::default();
        // 50 members without prefix roles or default: each gets AddDefault,
        // plus 3 members holding a prefix role whose rename will fail.
        for i in 0..47 {
            platform.members.push(member(&format!("m{i}"), &format!("user{i}"), &["D"]));
        }
        for i in 0..3 {
            let id = format!("bad{i}");
            platform.members.push(member(&id, &format!("baduser{i}"), &["A"]));
            platform.fail_renames_for.insert(id);
        }
        let platform = Arc::new(platform);

        let (tx, mut rx) = mpsc::channel(1);
        let orch = Arc::new(
            Orchestrator::new(
                Arc::clone(&platform) as Arc<dyn Platform>,
                rules(),
                Arc::new(ConcurrencyGuard::new()),
                "owner",
                MessagesConfig::default(),
            )
            .with_command_reports(tx),
        );

        let spec = CommandSpec::new("apply", "", CommandKind::ApplyAll);
        let admin = member("admin", "admin", &["ADMIN"]);
        let reply = orch.handle_command(&spec, &admin).await;
        assert_eq!(reply, "Command apply accepted");

        let report = rx.recv().await.unwrap();
        assert_eq!(report.text, "Command apply partial error: 3");
    }

    #[tokio::test]
    async fn test_bulk_skips_in_flight_members() {
        let mut platform = MockPlatform::default();
        platform.members.push(member("busy", "busy", &["A"]));
        let platform = Arc::new(platform);

        let guard = Arc::new(ConcurrencyGuard::new());
        assert!(guard.start_processing("busy"));

        let orch = Arc::new(Orchestrator::new(
            Arc::clone(&platform) as Arc<dyn Platform>,
            rules(),
            Arc::clone(&guard),
            "owner",
            MessagesConfig::default(),
        ));
        let errors = orch.apply_all_silent().await.unwrap();
        assert_eq!(errors, 0);
        // only the listing happened, no mutation touched the busy member
        assert_eq!(platform.calls(), vec!["list_members".to_string()]);
    }

    #[tokio::test]
    async fn test_update_event_for_owner_is_ignored() {
        let platform = Arc::new(MockPlatform::default());
        let orch = orchestrator(Arc::clone(&platform));
        orch.handle_member_update(&member("owner", "boss", &["A"])).await;
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_count_reports_sorted_listing() {
        let mut platform = MockPlatform::default();
        platform.members.push(member("1", "a", &["A", "D"]));
        platform.members.push(member("2", "b", &["D"]));
        let platform = Arc::new(platform);

        let orch = orchestrator(platform);
        let spec = CommandSpec::new("count", "", CommandKind::Count);
        let admin = member("admin", "admin", &["ADMIN"]);
        let reply = orch.handle_command(&spec, &admin).await;
        assert_eq!(reply, "Role counts:\nCaptain Cpt = 1\nMember = 2");
    }

    #[tokio::test]
    async fn test_forbidden_invoker_cannot_assign_roles() {
        let platform = Arc::new(MockPlatform::default());
        let orch = orchestrator(Arc::clone(&platform));
        let spec = CommandSpec::new(
            "captain",
            "",
            CommandKind::AssignRole { role_id: "A".into() },
        );
        let reply = orch.handle_command(&spec, &member("1", "a", &["F"])).await;
        assert_eq!(reply, MessagesConfig::default().unauthorized);
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_build_name_value_list_sorts_by_name() {
        let listing = build_name_value_list(
            "Counts:",
            vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())],
        );
        assert_eq!(listing, "Counts:\na = 1\nb = 2");
    }

    #[test]
    fn test_tally_roles_with_filter() {
        let members = vec![member("1", "a", &["A", "D"]), member("2", "b", &["D"])];
        let filter: HashSet<RoleId> = ["D".to_string()].into_iter().collect();
        let counts = tally_roles(&members, Some(&filter));
        assert_eq!(counts.len(), 1);
        assert_eq!(counts["D"], 2);
    }

    #[test]
    fn test_tally_roles_unfiltered() {
        let members = vec![member("1", "a", &["A", "D"]), member("2", "b", &["D"])];
        let counts = tally_roles(&members, None);
        assert_eq!(counts["A"], 1);
        assert_eq!(counts["D"], 2);
    }
}
