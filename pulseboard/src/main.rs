//! pulseboard - command line access to the productivity dashboard
//!
//! Runs aggregation cycles, prints trends and planning analytics, and
//! reports configuration status.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/pulseboard/pulseboard.db (~/.local/share/pulseboard/pulseboard.db)
//! - Logs: $XDG_STATE_HOME/pulseboard/pulseboard.log (~/.local/state/pulseboard/pulseboard.log)
//! - Config: $XDG_CONFIG_HOME/pulseboard/config.toml (~/.config/pulseboard/config.toml)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pulseboard_core::db::DailyRollup;
use pulseboard_core::{AggregationEnvelope, Config, DashboardContext, SourceResult};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pulseboard")]
#[command(about = "Personal productivity dashboard")]
#[command(version)]
struct Args {
    /// Write logs to the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the XDG config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate every source once and print their status
    Snapshot {
        /// Do not record snapshots
        #[arg(long)]
        no_store: bool,

        /// Keep aggregating until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Seconds between cycles (only with --watch; default: server.refresh_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Print the full envelope as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print daily rollups per source
    Trends {
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Print planning session analytics
    Sessions {
        #[arg(short, long, default_value = "30")]
        days: u32,
    },

    /// Show configuration status and problems
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard = if args.verbose {
        Some(
            pulseboard_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    match args.command {
        Command::Config => show_config(&config),
        Command::Trends { days } => {
            check_days(days, 365)?;
            let ctx = DashboardContext::from_config(config)?;
            show_trends(&ctx, days)
        }
        Command::Sessions { days } => {
            check_days(days, 365)?;
            let ctx = DashboardContext::from_config(config)?;
            show_sessions(&ctx, days)
        }
        Command::Snapshot {
            no_store,
            watch,
            interval,
            json,
        } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.refresh_interval());
            let ctx = DashboardContext::from_config(config)?;
            if watch {
                run_watch(&ctx, !no_store, json, interval).await
            } else {
                run_once(&ctx, !no_store, json).await;
                Ok(())
            }
        }
    }
}

fn check_days(days: u32, max: u32) -> Result<()> {
    if !(1..=max).contains(&days) {
        bail!("--days must be between 1 and {}", max);
    }
    Ok(())
}

// ============================================
// snapshot
// ============================================

async fn run_once(ctx: &DashboardContext, persist: bool, json: bool) {
    let spinner = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Aggregating sources...");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let envelope = ctx.aggregator().aggregate(persist).await;
    spinner.finish_and_clear();

    if json {
        match serde_json::to_string_pretty(&envelope) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("failed to encode envelope: {}", e),
        }
    } else {
        print_envelope(&envelope);
    }
}

async fn run_watch(
    ctx: &DashboardContext,
    persist: bool,
    json: bool,
    interval: Duration,
) -> Result<()> {
    println!(
        "Watching every {}s (Ctrl+C to stop)\n",
        interval.as_secs()
    );

    // One listener for the whole session, so Ctrl+C mid-cycle is not lost.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let cycle = async {
            run_once(ctx, persist, json).await;
            tokio::time::sleep(interval).await;
        };

        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl+C")?;
                println!("\nStopped");
                tracing::info!("Watch mode stopped");
                return Ok(());
            }
            _ = cycle => {}
        }
    }
}

fn print_envelope(envelope: &AggregationEnvelope) {
    println!(
        "{}  overall: {}  ({} ms)",
        envelope.generated_at().format("%Y-%m-%d %H:%M:%S UTC"),
        envelope.overall_status().as_str(),
        envelope.fetch_duration_ms()
    );

    for (source, result) in envelope.sources() {
        match result {
            SourceResult::Error { message } => {
                println!("  {:<8} error: {}", source.as_str(), message)
            }
            other => println!("  {:<8} {}", source.as_str(), other.status().as_str()),
        }
    }

    match serde_json::to_value(envelope.storage()) {
        Ok(storage) => println!("  storage  {}", storage),
        Err(e) => tracing::warn!(error = %e, "Failed to encode storage outcome"),
    }
}

// ============================================
// trends / sessions
// ============================================

fn show_trends(ctx: &DashboardContext, days: u32) -> Result<()> {
    let trends = ctx
        .store()
        .snapshots()
        .trends(days)
        .context("failed to read trends")?;

    println!("Trends for the last {} day(s)", days);
    for (source, rollups) in &trends {
        println!("\n{}:", source);
        if rollups.is_empty() {
            println!("  (no data)");
            continue;
        }
        for rollup in rollups {
            println!("  {}", format_rollup(rollup));
        }
    }
    Ok(())
}

fn format_rollup(rollup: &DailyRollup) -> String {
    // Grouped metrics (project:, column:, ...) would swamp the line.
    let headline: Vec<String> = rollup
        .metrics
        .iter()
        .filter(|(name, _)| !name.contains(':'))
        .map(|(name, value)| format!("{}={:.1}", name, value))
        .collect();
    format!(
        "{}  samples={}  {}",
        rollup.date,
        rollup.samples,
        headline.join(" ")
    )
}

fn show_sessions(ctx: &DashboardContext, days: u32) -> Result<()> {
    let analytics = ctx
        .store()
        .sessions()
        .analytics(days)
        .context("failed to read planning analytics")?;

    let totals = &analytics.totals;
    println!("Planning sessions, last {} day(s)", days);
    println!("  Sessions:       {}", totals.total_sessions);
    println!("  Total time:     {}s", totals.total_duration);
    println!("  Average time:   {:.0}s", totals.avg_duration);
    println!("  Messages:       {}", totals.total_messages);
    println!("  Actions:        {}", totals.total_actions);
    println!("  After session:  {}", totals.post_session_messages);

    if !analytics.action_breakdown.is_empty() {
        println!("\nActions by type:");
        for action in &analytics.action_breakdown {
            println!("  {:<12} {}", action.action_type, action.count);
        }
    }

    if !analytics.sessions.is_empty() {
        println!("\nRecent sessions:");
        for session in &analytics.sessions {
            let state = if session.is_active() { "active" } else { "ended" };
            println!(
                "  #{:<4} {}  {:<6} messages={} actions={}",
                session.id,
                session.started_at.format("%Y-%m-%d %H:%M"),
                state,
                session.messages_count,
                session.actions_count
            );
        }
    }
    Ok(())
}

// ============================================
// config
// ============================================

fn show_config(config: &Config) -> Result<()> {
    println!("Config:   {}", Config::config_path().display());
    println!("Database: {}", Config::database_path().display());
    println!("Logs:     {}", Config::log_path().display());
    println!();

    let status = serde_json::to_string_pretty(&config.status())
        .context("failed to encode configuration status")?;
    println!("{}", status);

    let problems = config.validate();
    if problems.is_empty() {
        println!("\nNo problems found");
    } else {
        println!("\nProblems:");
        for problem in &problems {
            println!("  - {}", problem);
        }
    }
    Ok(())
}
