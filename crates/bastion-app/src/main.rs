//! Bastion - filter subscription and update orchestrator.
//!
//! Command line front end. `bastion run` keeps filters up to date in the
//! background; the other subcommands inspect or change filter state and
//! exit.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bastion_app::{App, AppPaths};
use bastion_core::{
    CustomFilterOptions, Filter, FilterId, GroupId, SchedulerConfig, Settings,
    UpdateCheckReport,
};
use clap::{Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bastion - filter subscription and update orchestrator
#[derive(Parser, Debug)]
#[command(name = "bastion", version, about)]
struct Args {
    /// Data directory (database, metadata snapshot, logs)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the autoupdate daemon until Ctrl-C
    Run {
        /// Fetch metadata and enable the default groups first
        #[arg(long)]
        first_run: bool,
    },

    /// List filters
    Filters,

    /// List groups
    Groups,

    /// Install and enable filters
    Enable {
        #[arg(required = true)]
        ids: Vec<FilterId>,
    },

    /// Disable filters
    Disable {
        #[arg(required = true)]
        ids: Vec<FilterId>,
    },

    /// Enable a group, turning on its recommended filters the first time
    EnableGroup { id: GroupId },

    /// Disable a group
    DisableGroup { id: GroupId },

    /// Subscribe to a custom filter list
    Subscribe {
        url: String,

        /// Title shown instead of the list's own title
        #[arg(long)]
        title: Option<String>,

        /// Trust the list
        #[arg(long)]
        trusted: bool,
    },

    /// Show the header of a custom filter list without subscribing
    Info {
        url: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// Remove a filter
    Remove { id: FilterId },

    /// Check filters for updates
    Check {
        /// Ignore the update period
        #[arg(long)]
        force: bool,

        /// Check a single filter
        #[arg(long)]
        filter: Option<FilterId>,
    },

    /// Reset filter versions and download everything again
    Reload,

    /// Set the autoupdate period in hours (0 or less disables it)
    SetPeriod {
        #[arg(allow_negative_numbers = true)]
        hours: i64,
    },

    /// Remove obsolete and deleted filters
    Cleanup,

    /// Show the groups and filters offered to new users
    Offer,
}

/// Initialize logging with file rotation.
fn init_logging(
    args: &Args,
    paths: &AppPaths,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };
    let console = args.debug || matches!(args.command, Command::Run { .. });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "bastion={lvl},bastion_core={lvl},bastion_storage={lvl},bastion_remote={lvl},bastion_app={lvl},warn",
            lvl = log_level
        ))
    });

    if std::fs::create_dir_all(&paths.logs_dir).is_ok() {
        // Rotates daily, keeps the last 5 files
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .max_log_files(5)
            .filename_prefix("bastion")
            .filename_suffix("log")
            .build(&paths.logs_dir)
            .ok();

        if let Some(appender) = file_appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            if console {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();
            }

            tracing::debug!("Logging to {:?}", paths.logs_dir);
            return Some(guard);
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

/// One-shot commands run immediately instead of waiting for the timers.
fn one_shot_config() -> SchedulerConfig {
    SchedulerConfig {
        first_check_delay: Duration::ZERO,
        reload_delay: Duration::ZERO,
        ..SchedulerConfig::default()
    }
}

fn flags(filter: &Filter) -> String {
    [
        (filter.enabled, 'E'),
        (filter.installed, 'I'),
        (filter.loaded, 'L'),
        (filter.is_trusted(), 'T'),
    ]
    .iter()
    .map(|&(set, c)| if set { c } else { '-' })
    .collect()
}

fn print_filters(filters: &[Filter]) {
    println!("{:>6}  {:>5}  {:<5} {:<14} NAME", "ID", "GROUP", "FLAGS", "VERSION");
    for filter in filters {
        println!(
            "{:>6}  {:>5}  {:<5} {:<14} {}",
            filter.filter_id,
            filter.group_id,
            flags(filter),
            filter.version,
            filter.name
        );
    }
}

fn print_report(report: &UpdateCheckReport) {
    if !report.success {
        println!("Update check failed");
        return;
    }
    let updated = report.updated_filters.as_deref().unwrap_or_default();
    if updated.is_empty() {
        println!("All filters are up to date");
    } else {
        println!("Updated {} filters:", updated.len());
        print_filters(updated);
    }
}

async fn run_command(app: &App, command: Command) -> anyhow::Result<()> {
    let manager = app.manager();

    match command {
        Command::Run { first_run } => app.run_daemon(first_run).await?,
        Command::Filters => {
            app.init().await?;
            let mut filters = manager.get_filters();
            filters.sort_by_key(|f| (f.group_id, f.display_number, f.filter_id));
            print_filters(&filters);
        }
        Command::Groups => {
            app.init().await?;
            let mut groups = manager.get_groups();
            groups.sort_by_key(|g| (g.display_number, g.group_id));
            println!("{:>5}  {:<9} NAME", "ID", "STATE");
            for group in groups {
                println!("{:>5}  {:<9} {}", group.group_id, format!("{:?}", group.state), group.name);
            }
        }
        Command::Enable { ids } => {
            app.init().await?;
            manager.add_and_enable_filters(&ids).await;
            let enabled: Vec<Filter> = ids
                .iter()
                .filter_map(|&id| manager.get_filter_by_id(id).ok())
                .collect();
            print_filters(&enabled);
        }
        Command::Disable { ids } => {
            app.init().await?;
            manager.disable_filters(&ids);
        }
        Command::EnableGroup { id } => {
            app.init().await?;
            manager.enable_filters_group(id).await;
        }
        Command::DisableGroup { id } => {
            app.init().await?;
            manager.disable_filters_group(id);
        }
        Command::Subscribe {
            url,
            title,
            trusted,
        } => {
            app.init().await?;
            let filter = manager
                .subscribe_to_custom_filter(&url, &CustomFilterOptions { title, trusted })
                .await
                .with_context(|| format!("Failed to subscribe to {}", url))?;
            print_filters(&[filter]);
        }
        Command::Info { url, title } => {
            let info = manager
                .load_custom_filter_info(&url, &CustomFilterOptions { title, trusted: false })
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Remove { id } => {
            app.init().await?;
            manager.remove_filter(id).await?;
        }
        Command::Check { force, filter } => {
            app.init().await?;
            match filter {
                Some(id) => match app.scheduler().check_filter_update(id).await {
                    Some(report) => print_report(&report),
                    None => println!("Filter {} does not need a check", id),
                },
                None => print_report(&app.scheduler().check_filters_update(force, None).await),
            }
        }
        Command::Reload => {
            app.init().await?;
            print_report(&app.scheduler().reload_filters().await);
        }
        Command::SetPeriod { hours } => {
            app.settings().set_update_period_hours(hours)?;
            println!(
                "Autoupdate period: {} hours",
                app.settings().filters_update_period_hours()
            );
        }
        Command::Cleanup => {
            app.init().await?;
            let summary = app.cleanup().await?;
            println!(
                "Removed obsolete filters {:?}, deleted custom filters {:?}",
                summary.obsolete, summary.custom
            );
        }
        Command::Offer => {
            app.init().await?;
            for group_id in manager.offer_groups_and_filters() {
                println!("group {}: {:?}", group_id, manager.recommended_filters(group_id));
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let paths = AppPaths::resolve(args.data_dir.clone())?;

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args, &paths);
    tracing::debug!("Args: {:?}", args);

    let config = match args.command {
        Command::Run { .. } => SchedulerConfig::default(),
        _ => one_shot_config(),
    };
    let app = App::open(paths, config)?;

    let result = run_command(&app, args.command).await;
    let stats = app.close().await?;
    tracing::debug!("Stored rules for {} filters", stats.saved);

    result
}
