//! Rolekeeper binary: configuration loading, platform wiring and the
//! gateway event loop.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use rolekeeper_channels::discord::gateway::{self, GatewayEvent};
use rolekeeper_channels::{DeepLClient, DiscordClient, SenderManager};
use rolekeeper_core::config::RolekeeperConfig;
use rolekeeper_core::rules::{PrefixRule, RuleTable, load_rule_file};
use rolekeeper_core::traits::{Platform, Translator};
use rolekeeper_core::types::{ActivityEvent, RoleId};
use rolekeeper_engine::{CommandKind, CommandRegistry, CommandSpec, ConcurrencyGuard, Orchestrator};
use rolekeeper_scheduler::{ActivityTracker, FeedWatcher, ReminderScanner, TickFanout};

#[derive(Parser)]
#[command(name = "rolekeeper", version, about = "Community role and prefix keeper")]
struct Cli {
    /// Config file path (default: ~/.rolekeeper/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(RolekeeperConfig::default_path);
    let config = RolekeeperConfig::load_from(&config_path)
        .with_context(|| format!("Cannot load {}", config_path.display()))?;
    let prefix_rules = load_rule_file(Path::new(&config.rules.file))
        .with_context(|| format!("Cannot load rule file {}", config.rules.file))?;

    let mut discord =
        DiscordClient::new(&config.platform.bot_token, &config.platform.community_id);
    discord.connect().await?;
    let owner_id = discord.owner_id().await?;
    let gateway_url = discord.gateway_url().await?;
    let platform_roles = discord.list_roles().await?;
    let platform: Arc<DiscordClient> = Arc::new(discord);

    let role_ids: HashMap<String, RoleId> = platform_roles
        .iter()
        .map(|r| (r.name.clone(), r.id.clone()))
        .collect();
    let resolve = |name: &str| -> anyhow::Result<RoleId> {
        role_ids
            .get(name)
            .cloned()
            .with_context(|| format!("Role '{name}' does not exist on the platform"))
    };

    // Build the immutable rule table from the rule file and the role-name
    // lists, all resolved against the platform's role listing.
    let mut builder = RuleTable::builder().default_role(resolve(&config.rules.default_role)?);
    let mut prefix_role_ids = Vec::new();
    let mut command_rules: Vec<(RoleId, &PrefixRule)> = Vec::new();
    for rule in &prefix_rules {
        let role_id = resolve(&rule.role_name)?;
        builder = builder.prefix(role_id.clone(), rule.prefix.clone());
        if rule.is_special() {
            builder = builder.special(role_id.clone());
        } else {
            builder = builder.command_role(role_id.clone());
            command_rules.push((role_id.clone(), rule));
        }
        prefix_role_ids.push(role_id);
    }
    for name in &config.rules.authorized_roles {
        builder = builder.authorized(resolve(name)?);
    }
    for name in &config.rules.forbidden_roles {
        builder = builder.forbidden(resolve(name)?);
    }
    for name in &config.rules.ignored_roles {
        builder = builder.ignored(resolve(name)?);
    }
    for role in &platform_roles {
        builder = builder.display_name(role.id.clone(), role.name.clone());
    }
    let rules = Arc::new(builder.build()?);

    let joining_role = match config.rules.joining_role.as_str() {
        "" => None,
        name => Some(resolve(name)?),
    };

    let count_filter: Option<HashSet<RoleId>> = match config.rules.count_filter.as_str() {
        "" => None,
        "list" => {
            let mut set = HashSet::new();
            for name in &config.rules.count_filter_roles {
                set.insert(resolve(name)?);
            }
            Some(set)
        }
        "prefix" => Some(prefix_role_ids.iter().cloned().collect()),
        "command" => Some(command_rules.iter().map(|(id, _)| id.clone()).collect()),
        other => bail!("Unknown count filter mode '{other}'"),
    };

    let mut dispatcher = SenderManager::new(
        Arc::clone(&platform) as Arc<dyn Platform>,
        config.dispatch.message_limit,
    );
    let updates_out = dispatcher.sender(&config.destinations.updates);
    let commands_out = dispatcher.sender(&config.destinations.commands);
    let news_out = dispatcher.sender(&config.destinations.news);
    let reminders_out = dispatcher.sender(&config.destinations.reminders);
    let activity_out = dispatcher.sender(&config.destinations.activity);

    let translator: Option<Arc<dyn Translator>> = config
        .translate
        .as_ref()
        .map(|c| Arc::new(DeepLClient::new(c)) as Arc<dyn Translator>);

    // Periodic work, all driven by the single fan-out timer.
    let mut fanout = TickFanout::new(tokio::time::Duration::from_secs(
        config.scheduler.check_interval_secs,
    ));
    let window_start =
        chrono::Utc::now() - chrono::Duration::seconds(config.scheduler.initial_backward_secs as i64);

    if let Some(news_out) = &news_out {
        for feed in &config.feeds {
            let watcher =
                FeedWatcher::new(feed, translator.clone(), window_start, news_out.clone())?;
            tokio::spawn(watcher.run(fanout.subscribe()));
        }
    } else if !config.feeds.is_empty() {
        tracing::warn!("Feeds configured without a news destination, skipping");
    }

    if let Some(reminders_out) = reminders_out
        && !config.reminders.delays_mins.is_empty()
    {
        let link_base = format!(
            "https://discord.com/events/{}/",
            config.platform.community_id
        );
        let scanner = ReminderScanner::new(
            &config.reminders,
            Arc::clone(&platform) as Arc<dyn Platform>,
            link_base,
            window_start,
            reminders_out,
        );
        tokio::spawn(scanner.run(fanout.subscribe()));
    }

    let activity_enabled = !config.activity.path.is_empty();
    let mut activity_events: Option<mpsc::Sender<ActivityEvent>> = None;
    let mut activity_flush: Option<mpsc::Sender<()>> = None;
    if activity_enabled {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let tracker = ActivityTracker::new(
            &config.activity,
            Arc::clone(&platform) as Arc<dyn Platform>,
            activity_out,
        );
        tokio::spawn(tracker.run(events_rx, fanout.subscribe(), flush_rx));
        activity_events = Some(events_tx);
        activity_flush = Some(flush_tx);
    }

    let guard = Arc::new(ConcurrencyGuard::new());
    let mut orchestrator = Orchestrator::new(
        Arc::clone(&platform) as Arc<dyn Platform>,
        Arc::clone(&rules),
        guard,
        owner_id.clone(),
        config.messages.clone(),
    );
    if let Some(sender) = commands_out {
        orchestrator = orchestrator.with_command_reports(sender);
    }
    if let Some(sender) = updates_out {
        orchestrator = orchestrator.with_update_reports(sender);
    }
    if let Some(filter) = count_filter {
        orchestrator = orchestrator.with_count_filter(filter);
    }
    if let Some(sender) = activity_flush {
        orchestrator = orchestrator.with_activity_flush(sender);
    }
    let orchestrator = Arc::new(orchestrator);

    // Initial pass so the community is consistent before events flow.
    match orchestrator.apply_all_silent().await {
        Ok(0) => tracing::info!("Startup reconciliation pass clean"),
        Ok(errors) => tracing::warn!("Startup reconciliation pass had {errors} member failures"),
        Err(e) => tracing::error!("Startup reconciliation pass failed: {e}"),
    }

    let mut registry = CommandRegistry::new();
    registry.register(CommandSpec::new(
        config.commands.apply.clone(),
        "Reconcile every member's prefix and default role",
        CommandKind::ApplyAll,
    ));
    registry.register(CommandSpec::new(
        config.commands.clean.clone(),
        "Strip managed prefixes from every member",
        CommandKind::CleanAll,
    ));
    registry.register(CommandSpec::new(
        config.commands.reset.clone(),
        "Go back to the default role",
        CommandKind::ResetOne,
    ));
    registry.register(CommandSpec::new(
        config.commands.reset_all.clone(),
        "Reset every member to the default role",
        CommandKind::ResetAll,
    ));
    registry.register(CommandSpec::new(
        config.commands.count.clone(),
        "Tally role membership",
        CommandKind::Count,
    ));
    if activity_enabled {
        registry.register(CommandSpec::new(
            config.commands.save_activity.clone(),
            "Write the activity snapshot now",
            CommandKind::SaveActivity,
        ));
    }
    for (role_id, rule) in &command_rules {
        registry.register(CommandSpec::new(
            rule.command.clone().unwrap_or_default(),
            format!("Take the {} role", rule.role_name),
            CommandKind::AssignRole {
                role_id: role_id.clone(),
            },
        ));
    }

    let mut registered_ids = Vec::with_capacity(registry.len());
    for spec in registry.iter() {
        let id = platform.register_command(&spec.name, &spec.description).await?;
        registered_ids.push(id);
    }
    tracing::info!("Registered {} commands", registered_ids.len());

    fanout.spawn();

    let (gateway_tx, mut gateway_rx) = mpsc::channel(64);
    tokio::spawn(gateway::run(
        gateway_url,
        config.platform.bot_token.clone(),
        gateway_tx,
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            event = gateway_rx.recv() => {
                let Some(event) = event else { break };
                handle_event(
                    event,
                    &orchestrator,
                    &registry,
                    &platform,
                    &rules,
                    &owner_id,
                    joining_role.as_deref(),
                    activity_events.as_ref(),
                )
                .await;
            }
        }
    }

    // Deregister our commands so a renamed configuration starts clean.
    for command_id in &registered_ids {
        if let Err(e) = platform.delete_command(command_id).await {
            tracing::warn!("Command deregistration failed: {e}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_event(
    event: GatewayEvent,
    orchestrator: &Arc<Orchestrator>,
    registry: &CommandRegistry,
    platform: &Arc<DiscordClient>,
    rules: &Arc<RuleTable>,
    owner_id: &str,
    joining_role: Option<&str>,
    activity_events: Option<&mpsc::Sender<ActivityEvent>>,
) {
    match event {
        GatewayEvent::MemberUpdate(member) => {
            orchestrator.handle_member_update(&member).await;
        }
        GatewayEvent::MemberJoin(member) => {
            if member.id == owner_id {
                return;
            }
            if let Some(role_id) = joining_role
                && let Err(e) = platform.add_role(&member.id, role_id).await
            {
                tracing::warn!("Joining role addition failed for {}: {e}", member.id);
            }
        }
        GatewayEvent::CommandInvoked {
            name,
            interaction_id,
            interaction_token,
            invoker,
        } => {
            let Some(spec) = registry.get(&name) else {
                tracing::warn!("Unknown command invoked: {name}");
                return;
            };
            let reply = orchestrator.handle_command(spec, &invoker).await;
            if let Err(e) = platform
                .respond_interaction(&interaction_id, &interaction_token, &reply)
                .await
            {
                tracing::warn!("Interaction response failed: {e}");
            }
        }
        GatewayEvent::Activity {
            member_id,
            roles,
            vocal,
        } => {
            // administrative members are excluded from tracking
            if member_id == owner_id || rules.is_administrative(&roles) {
                return;
            }
            if let Some(sender) = activity_events {
                let event = ActivityEvent {
                    member_id,
                    timestamp: chrono::Utc::now(),
                    vocal,
                };
                if sender.send(event).await.is_err() {
                    tracing::debug!("Activity tracker gone");
                }
            }
        }
    }
}
