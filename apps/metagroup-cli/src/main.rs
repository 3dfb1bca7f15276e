//! # Metagroup CLI
//!
//! Administrative entry point: batch runs, link management, host events and
//! housekeeping. Every command prints JSON on stdout; logs go to stderr.
//!
//! ## Startup Sequence
//! 1. Parse arguments
//! 2. Load configuration (file, then `METAGROUP_*` environment overrides)
//! 3. Initialize tracing (config level, `RUST_LOG` wins when set)
//! 4. Open the database and run migrations
//! 5. Dispatch the command; the process exit code is its status
//!
//! ## Examples
//! ```bash
//! metagroup links create --target 3 --source 1 --group 11
//! metagroup reconcile --course 3 --verbose
//! metagroup event '{"event":"group_member_added","course_id":1,"group_id":11,"user_id":42}'
//! metagroup cleanup-groups --course 3 --dry-run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use metagroup_core::{LinkStatus, SyncMode};
use metagroup_db::LinkFilter;
use metagroup_sync::{
    CreateLinkOptions, Engine, FanOut, HostEvent, LinkUpdate, RunStatus, SyncConfig, SyncError, SyncResult,
};

#[derive(Debug, Parser)]
#[command(name = "metagroup", version, about = "Group link reconciliation engine")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the batch reconciliation.
    Reconcile {
        /// Only links targeting this course.
        #[arg(long)]
        course: Option<i64>,
        /// Log the per-pass summary.
        #[arg(long)]
        verbose: bool,
        /// Print the full run report as JSON.
        #[arg(long)]
        report: bool,
    },
    /// Applies the lost-link disposition without reconciling.
    LostLinks {
        #[arg(long)]
        course: Option<i64>,
    },
    /// Manages links.
    #[command(subcommand)]
    Links(LinksCommand),
    /// Applies one host event given as JSON.
    Event { json: String },
    /// Deletes empty groups created for links.
    CleanupGroups {
        /// Courses to clean; every course when omitted.
        #[arg(long = "course")]
        courses: Vec<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Removes every link together with its enrolments, memberships and roles.
    Uninstall {
        #[arg(long)]
        yes: bool,
    },
    /// Shows or writes the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum LinksCommand {
    List {
        #[arg(long)]
        target: Option<i64>,
        #[arg(long)]
        source: Option<i64>,
        #[arg(long)]
        status: Option<LinkStatus>,
    },
    Create {
        #[arg(long)]
        target: i64,
        #[arg(long)]
        source: i64,
        /// Source group; repeat for several.
        #[arg(long = "group", required = true)]
        groups: Vec<i64>,
        /// Existing target group to feed.
        #[arg(long)]
        target_group: Option<i64>,
        /// Name for a newly created target group.
        #[arg(long)]
        name: Option<String>,
        /// One target group per source group.
        #[arg(long)]
        per_source: bool,
        #[arg(long)]
        role: Option<i64>,
        /// Sync once, then freeze.
        #[arg(long)]
        snapshot: bool,
        /// Store the link pending and leave syncing to the next batch run.
        #[arg(long)]
        no_sync: bool,
    },
    Update {
        id: i64,
        #[arg(long)]
        source: Option<i64>,
        #[arg(long)]
        group: Option<i64>,
        #[arg(long)]
        target_group: Option<i64>,
        #[arg(long, conflicts_with = "clear_role")]
        role: Option<i64>,
        #[arg(long)]
        clear_role: bool,
    },
    Enable { id: i64 },
    Disable { id: i64 },
    Delete { id: i64 },
    /// Recomputes the cached source courses and the root of a link.
    Recalculate { id: i64 },
    /// Prints every chain leading to a link.
    Chain { id: i64 },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    /// Writes the current configuration to the config path.
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match SyncConfig::load(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("metagroup: {}", e);
            return ExitCode::from(1);
        }
    };
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: SyncConfig) -> SyncResult<u8> {
    if let Command::Config(command) = &cli.command {
        return match command {
            ConfigCommand::Show => {
                print_json(&config)?;
                Ok(0)
            }
            ConfigCommand::Init => {
                let path = config.save(cli.config.clone())?;
                print_json(&serde_json::json!({ "path": path }))?;
                Ok(0)
            }
        };
    }

    let engine = Engine::open(config).await?;
    let code = dispatch(&engine, cli.command).await;
    engine.close().await;
    code
}

async fn dispatch(engine: &Engine, command: Command) -> SyncResult<u8> {
    match command {
        Command::Reconcile { course, verbose, report } => {
            if report && engine.config().enabled {
                let report = engine.reconcile(course).await?;
                print_json(&report)?;
                let status = if report.has_failures() { RunStatus::Error } else { RunStatus::Ok };
                return Ok(status.code() as u8);
            }
            let status = engine.run_reconciliation(course, verbose).await;
            print_json(&serde_json::json!({ "status": format!("{:?}", status).to_lowercase() }))?;
            Ok(status.code() as u8)
        }

        Command::LostLinks { course } => {
            let handled = engine.lost_links().process(course).await?;
            print_json(&serde_json::json!({ "handled": handled }))?;
            Ok(0)
        }

        Command::Links(command) => links(engine, command).await,

        Command::Event { json } => {
            let event: HostEvent = serde_json::from_str(&json)?;
            let changed = engine.handle_event(&event).await?;
            print_json(&serde_json::json!({ "changed": changed }))?;
            Ok(0)
        }

        Command::CleanupGroups { courses, dry_run } => {
            let report = engine.links().cleanup_orphaned_groups(&courses, dry_run).await?;
            print_json(&report)?;
            Ok(0)
        }

        Command::Uninstall { yes } => {
            if !yes {
                return Err(SyncError::InvalidConfig(
                    "uninstall removes every link and its derived data; pass --yes to confirm".into(),
                ));
            }
            let removed = engine.links().uninstall().await?;
            info!(removed, "Uninstalled");
            print_json(&serde_json::json!({ "removed_links": removed }))?;
            Ok(0)
        }

        Command::Config(_) => Ok(0),
    }
}

async fn links(engine: &Engine, command: LinksCommand) -> SyncResult<u8> {
    let manager = engine.links();
    match command {
        LinksCommand::List { target, source, status } => {
            let filter = LinkFilter {
                target_course_id: target,
                source_course_id: source,
                status,
            };
            print_json(&manager.list_links(&filter).await?)?;
        }

        LinksCommand::Create {
            target,
            source,
            groups,
            target_group,
            name,
            per_source,
            role,
            snapshot,
            no_sync,
        } => {
            let options = CreateLinkOptions {
                target_group_id: target_group,
                target_group_name: name,
                status: if no_sync { LinkStatus::DisabledPendingInitialSync } else { LinkStatus::Enabled },
                role_id: role,
                sync_mode: if snapshot { SyncMode::Snapshot } else { SyncMode::Mirror },
                sync_on_create: !no_sync,
            };
            let fan_out = if per_source { FanOut::PerSource } else { FanOut::Shared };
            let links = manager.create_links(target, source, &groups, fan_out, options).await?;
            print_json(&links)?;
        }

        LinksCommand::Update {
            id,
            source,
            group,
            target_group,
            role,
            clear_role,
        } => {
            let update = LinkUpdate {
                source_course_id: source,
                source_group_id: group,
                target_group_id: target_group,
                role_id: if clear_role { Some(None) } else { role.map(Some) },
                sync_mode: None,
            };
            print_json(&manager.update_link(id, update).await?)?;
        }

        LinksCommand::Enable { id } => {
            print_json(&manager.set_link_status(id, LinkStatus::Enabled).await?)?;
        }

        LinksCommand::Disable { id } => {
            print_json(&manager.set_link_status(id, LinkStatus::Disabled).await?)?;
        }

        LinksCommand::Delete { id } => {
            let deleted = manager.delete_link_by_id(id).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
            if !deleted {
                return Ok(1);
            }
        }

        LinksCommand::Recalculate { id } => {
            let source_courses = manager.recalculate_source_courses(id).await?;
            let link = manager.recalculate_root(id).await?;
            print_json(&serde_json::json!({ "source_courses": source_courses, "link": link }))?;
        }

        LinksCommand::Chain { id } => {
            print_json(&manager.chain_for_display(id).await?)?;
        }
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> SyncResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
