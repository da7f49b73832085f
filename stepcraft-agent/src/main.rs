use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use step_sync::api::RegistrationApi;
use step_sync::clock::SystemClock;
use step_sync::device::DeviceIdentity;
use step_sync::http::HttpRegistrationClient;
use step_sync::identity::ChangeResult;
use step_sync::push::PushTokenReconciler;
use step_sync::store::{JsonFileStore, SharedStore};
use step_sync::{SyncOrchestrator, SyncTrigger};

mod config;
mod export_source;
mod notifier;

use config::AgentConfig;
use export_source::JsonExportSource;
use notifier::ConsoleNotifier;

#[derive(Parser, Debug)]
#[command(version, about = "Report today's steps to StepCraft servers", long_about = None)]
struct Args {
    /// State file (overrides STEPCRAFT_STORE)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Backend base URL (overrides STEPCRAFT_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Health-store export to read steps from
    #[arg(long, default_value = "steps.json")]
    steps: PathBuf,

    /// Don't raise milestone or server-removal notifications
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Trigger {
    Manual,
    Auto,
    Background,
}

impl From<Trigger> for SyncTrigger {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Manual => SyncTrigger::Manual,
            Trigger::Auto => SyncTrigger::Auto,
            Trigger::Background => SyncTrigger::Background,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send today's steps to every selected server
    Sync {
        #[arg(long, value_enum, default_value_t = Trigger::Manual)]
        trigger: Trigger,
        /// Give up on servers still in flight after this many seconds
        #[arg(long)]
        budget_secs: Option<u64>,
    },
    /// Show recent sync attempts, newest first
    Log,
    /// Show the local profile and preferences
    Status,
    /// Change the Minecraft username (once per day; later changes are queued)
    SetUsername { username: String },
    /// Join a server
    Select {
        server: String,
        #[arg(long)]
        invite_code: Option<String>,
    },
    /// Leave a server and forget its key
    Deselect { server: String },
    /// List servers available to join
    Servers {
        #[arg(long)]
        invite_code: Option<String>,
    },
    /// Re-sync push registrations with every selected server
    Push {
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        notifications_off: bool,
    },
    /// Update sync and notification preferences
    Prefs {
        #[arg(long)]
        auto_sync: Option<bool>,
        #[arg(long)]
        background_sync: Option<bool>,
        #[arg(long)]
        interval_minutes: Option<u32>,
        /// SERVER=true|false
        #[arg(long, value_parser = parse_server_flag)]
        admin_push: Option<(String, bool)>,
        /// SERVER=MIN_STEPS, toggles notification for that reward tier
        #[arg(long, value_parser = parse_server_tier)]
        milestone: Option<(String, i64)>,
    },
}

fn parse_server_flag(s: &str) -> Result<(String, bool), String> {
    let (server, flag) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected SERVER=true|false, got `{s}`"))?;
    let flag = flag
        .parse()
        .map_err(|_| format!("expected true or false, got `{flag}`"))?;
    Ok((server.to_string(), flag))
}

fn parse_server_tier(s: &str) -> Result<(String, i64), String> {
    let (server, min_steps) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected SERVER=MIN_STEPS, got `{s}`"))?;
    let min_steps = min_steps
        .parse()
        .map_err(|_| format!("expected a step count, got `{min_steps}`"))?;
    Ok((server.to_string(), min_steps))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = AgentConfig::from_env()?;
    if let Some(store) = args.store.clone() {
        config.store_path = store;
    }
    if let Some(base_url) = args.base_url.clone() {
        config.base_url = base_url;
    }

    let store = SharedStore::new(
        JsonFileStore::open(&config.store_path)
            .with_context(|| format!("Failed to open {}", config.store_path.display()))?,
    );
    let device = DeviceIdentity::load_or_create(&store, config.platform, None)
        .context("Failed to load device id")?;
    let api = Arc::new(
        HttpRegistrationClient::with_timeout(
            &config.base_url,
            &config.api_key,
            config.request_timeout,
        )
        .context("Failed to build HTTP client")?,
    );
    let health = Arc::new(JsonExportSource::new(&args.steps, config.platform));
    let reconciler = || {
        PushTokenReconciler::new(
            api.clone(),
            store.clone(),
            device.clone(),
            config.platform,
            config.push_sandbox,
        )
    };
    let orchestrator = SyncOrchestrator::new(
        config.engine(),
        store.clone(),
        device.clone(),
        api.clone(),
        health,
        Arc::new(SystemClock),
    )
    .with_notifier(Arc::new(ConsoleNotifier {
        enabled: !args.quiet,
    }))
    .with_push(reconciler());
    let reconciler = reconciler();

    match args.command {
        Command::Sync {
            trigger,
            budget_secs,
        } => {
            let trigger = SyncTrigger::from(trigger);
            let outcome = match budget_secs {
                Some(secs) => {
                    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
                    orchestrator.sync_with_deadline(trigger, deadline).await
                }
                None => orchestrator.sync(trigger).await,
            }
            .context("Sync failed")?;

            if outcome.skipped {
                println!("{trigger} sync is turned off");
            } else if outcome.no_step_data {
                println!("No steps recorded yet today");
            } else {
                println!("{} steps", outcome.steps);
                for server in &outcome.success_servers {
                    println!("  ✓ {server}");
                }
                for (server, reason) in &outcome.failed_servers {
                    println!("  ✗ {server}: {reason}");
                }
                for server in &outcome.removed_servers {
                    println!("  - {server} (removed)");
                }
            }
        }
        Command::Log => {
            for entry in orchestrator.sync_log()? {
                println!(
                    "{} [{}] {} {} steps: {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.source,
                    if entry.success { "ok  " } else { "FAIL" },
                    entry.steps,
                    entry.message
                );
            }
        }
        Command::Status => {
            let profile = orchestrator.profiles().profile()?;
            let prefs = orchestrator.profiles().preferences()?;
            let identity = orchestrator.identity();
            println!("Device: {}", device.device_id);
            println!(
                "Username: {}",
                profile.username().unwrap_or("(not set)")
            );
            if let Some(queued) = identity.queued()? {
                println!(
                    "Queued username: {} (from {})",
                    queued.username, queued.queued_on
                );
            }
            println!("Can change username today: {}", identity.can_change_today()?);
            println!("Servers: {}", profile.selected_servers.join(", "));
            match orchestrator.last_known_steps()? {
                Some(steps) => println!("Steps today: {steps}"),
                None => println!("Steps today: unknown"),
            }
            println!(
                "Auto sync: {}, background sync: {} every {} min",
                prefs.auto_sync_enabled,
                prefs.background_sync_enabled,
                prefs.background_sync_interval_minutes
            );
            for server in &profile.selected_servers {
                println!(
                    "  {server}: admin push {}, milestones {:?}",
                    prefs.admin_push_enabled(server),
                    prefs.milestone_tiers(server)
                );
            }
        }
        Command::SetUsername { username } => {
            match orchestrator.identity().request_change(&username)? {
                ChangeResult::Applied => {
                    println!("Username is now {}", username.trim());
                    reconciler.refresh(true).await?;
                }
                ChangeResult::Queued { queued_on } => println!(
                    "Username already changed today; {} will apply after the reset following {queued_on}",
                    username.trim()
                ),
                ChangeResult::Unchanged => println!("Username unchanged"),
            }
        }
        Command::Select {
            server,
            invite_code,
        } => {
            let server = server.trim().to_string();
            orchestrator
                .credentials()
                .set_invite_code(&server, invite_code.as_deref())?;
            orchestrator.profiles().select_server(&server)?;
            orchestrator
                .ensure_credential(&server)
                .await
                .with_context(|| format!("Failed to join {server}"))?;
            println!("Joined {server}");

            reconciler.refresh(true).await?;
        }
        Command::Deselect { server } => {
            // Unregister push for this server while its key still exists.
            orchestrator
                .profiles()
                .set_admin_push_enabled(&server, false)?;
            reconciler.refresh(true).await?;
            if orchestrator
                .profiles()
                .deselect_server(&server, orchestrator.credentials())?
            {
                println!("Left {server}");
            } else {
                println!("{server} was not selected");
            }
        }
        Command::Servers { invite_code } => {
            let servers = api
                .available_servers(invite_code.as_deref())
                .await
                .context("Failed to list servers")?;
            for server in servers {
                match server.created_at {
                    Some(created_at) => println!("{} (since {created_at})", server.server_name),
                    None => println!("{}", server.server_name),
                }
            }
        }
        Command::Push {
            token,
            notifications_off,
        } => {
            let token = match token {
                Some(token) => Some(token),
                None => reconciler.last_known_token()?,
            };
            let report = reconciler
                .reconcile(token.as_deref(), !notifications_off)
                .await?;
            println!(
                "{} registered, {} unregistered, {} failed",
                report.registered, report.unregistered, report.failed
            );
        }
        Command::Prefs {
            auto_sync,
            background_sync,
            interval_minutes,
            admin_push,
            milestone,
        } => {
            let profiles = orchestrator.profiles();
            profiles.update_preferences(|prefs| {
                if let Some(enabled) = auto_sync {
                    prefs.auto_sync_enabled = enabled;
                }
                if let Some(enabled) = background_sync {
                    prefs.background_sync_enabled = enabled;
                }
                if let Some(minutes) = interval_minutes {
                    prefs.background_sync_interval_minutes = minutes.max(15);
                }
            })?;
            if let Some((server, enabled)) = admin_push {
                profiles.set_admin_push_enabled(&server, enabled)?;
                reconciler.refresh(true).await?;
            }
            if let Some((server, min_steps)) = milestone {
                let enabled = !profiles.preferences()?.milestone_tiers(&server).contains(&min_steps);
                profiles.set_milestone_tier(&server, min_steps, enabled)?;
                println!(
                    "Milestone {min_steps} on {server}: {}",
                    if enabled { "on" } else { "off" }
                );
            }
        }
    }

    Ok(())
}
