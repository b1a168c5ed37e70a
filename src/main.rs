//! Spot XEMM - Main Entry Point
//!
//! Runs the cross-exchange market maker against paper venues.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spot_xemm::config::{Config, Preset};
use spot_xemm::persistence::{ArchiveSink, Ledger};
use spot_xemm::runner::PaperRunner;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Spot XEMM CLI
#[derive(Parser)]
#[command(name = "spot-xemm")]
#[command(version, about = "Cross-exchange spot market making")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the market maker on paper venues (default)
    Run {
        /// Starting preset: default or kraken_binance_us
        #[arg(short, long, default_value = "default")]
        preset: String,

        /// Config file layered over the preset
        #[arg(short, long)]
        config: Option<String>,

        /// Stop after this many ticks
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Show profit and recent hedges from the ledger
    Status {
        /// Path to the ledger database
        #[arg(short, long, default_value = "data/xemm_ledger.db")]
        db: String,

        /// Number of recent hedges to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print a preset as JSON
    Preset {
        /// Preset name
        #[arg(default_value = "default")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Status { db, limit }) => show_status(&db, limit),
        Some(Commands::Preset { name }) => print_preset(&name),
        Some(Commands::Run {
            preset,
            config,
            ticks,
        }) => run(&preset, config.as_deref(), ticks).await,
        None => run("default", None, None).await,
    }
}

async fn run(preset: &str, config_path: Option<&str>, max_ticks: Option<u64>) -> Result<()> {
    init_logging()?;

    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║                 SPOT XEMM (PAPER TRADING)                  ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let preset: Preset = preset.parse()?;
    let config = Config::load_with(preset, config_path)?;
    log_config(&config);

    let ledger = Ledger::new(&config.runtime.ledger_path)?;
    let archive = if config.archive.enabled {
        Some(ArchiveSink::new(
            &config.archive.path,
            config.archive.depth,
            config.archive.flush_interval()?,
        )?)
    } else {
        None
    };

    let runner = PaperRunner::new(&config, ledger, archive).await?;
    runner
        .run(Duration::from_millis(config.runtime.tick_interval_ms), max_ticks)
        .await
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "spot-xemm.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spot_xemm=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let s = &config.strategy;
    info!("📋 Configuration:");
    info!("   Maker: {} {}", config.maker.venue, config.maker.pair);
    info!("   Taker: {} {}", config.taker.venue, config.taker.pair);
    info!("   Order Amount: {}", s.order_amount);
    info!("   Spread: {} bps (cancel below {} bps)", s.spread_bps, s.min_spread_bps);
    info!("   Slippage Buffer: {} bps", s.slippage_buffer_bps);
    info!("   Max Order Age: {}s", s.max_order_age_secs);
    info!("   Fees: maker {} / taker {}", s.maker_fee, s.taker_fee);
    info!("   Halt On Unhedged Fill: {}", s.halt_on_unhedged_fill);
    info!("   Ledger: {}", config.runtime.ledger_path);
    if config.archive.enabled {
        info!(
            "   Archive: {} (depth {}, every {}s)",
            config.archive.path, config.archive.depth, config.archive.flush_interval_secs
        );
    }
}

fn print_preset(name: &str) -> Result<()> {
    let preset: Preset = name.parse()?;
    let json = serde_json::to_string_pretty(&Config::preset(preset))
        .context("Failed to encode preset")?;
    println!("{}", json);
    Ok(())
}

/// Show persisted profit totals and the latest hedges.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                    XEMM LEDGER STATUS                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The engine has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let ledger = Ledger::new(db_path)?;

    let Some(state) = ledger.load_state()? else {
        println!("\n❌ No saved state found in database.");
        return Ok(());
    };

    println!("\n💰 Profit");
    println!("   ├─ Total Profit:     {}", state.total_profit);
    println!("   ├─ Hedged Fills:     {}", state.hedge_count);
    println!("   ├─ Unhedged Fills:   {}", state.unhedged_count);
    println!("   ├─ Halted:           {}", state.halted);
    println!("   └─ Last Updated:     {}", state.last_saved.format("%Y-%m-%d %H:%M:%S UTC"));

    println!("\n📈 Quote Activity");
    for event in ["placed", "cancelled", "cancel_failed", "released", "orphan_cancelled"] {
        println!("   ├─ {:<17} {}", format!("{}:", event), ledger.quote_event_count(event)?);
    }

    let hedges = ledger.recent_hedges(limit)?;
    if !hedges.is_empty() {
        println!("\n🔁 Recent Hedges");
        for h in &hedges {
            println!(
                "   ┌─ {} {} {} {} @ {}",
                h.timestamp.format("%Y-%m-%d %H:%M:%S"),
                h.status,
                h.fill_side,
                h.fill_amount,
                h.fill_price
            );
            match (&h.hedge_order_id, h.hedge_price, h.hedge_amount) {
                (Some(id), Some(price), Some(amount)) => {
                    println!("   ├─ Hedge: {} @ {} ({})", amount, price, id);
                }
                _ => {
                    println!("   ├─ Reason: {}", h.reason.as_deref().unwrap_or("unknown"));
                }
            }
            println!("   └─ Profit: {}", h.profit);
        }
    }

    println!();
    Ok(())
}
