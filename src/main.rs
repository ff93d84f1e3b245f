use anyhow::{anyhow, Context};
use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use pairz::pairtrade::{PairTradeConfig, PairTradeEngine};
use pairz::pnl_logger::PnlLogger;
use pairz::ports::replay_feed::ReplayFeed;
use pairz::trade::execution::dry_run_executor::DryRunExecutor;
use std::env;
use std::io::Write;
use std::str::FromStr;

fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<i32>()
        .context("invalid TIMEZONE_OFFSET")?;
    let offset = FixedOffset::east_opt(offset_seconds)
        .ok_or_else(|| anyhow!("TIMEZONE_OFFSET out of range: {}", offset_seconds))?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    log::info!("Starting pairz replay...");
    let cfg = PairTradeConfig::from_env_or_yaml().context("invalid pairz config")?;
    let replay_file = cfg
        .replay_file
        .clone()
        .ok_or_else(|| anyhow!("REPLAY_FILE (or replay_file in the YAML config) must be set"))?;
    let mut feed = ReplayFeed::new(&replay_file)?;

    let executor = DryRunExecutor::new(cfg.equity_usd, cfg.fee_bps);
    let pnl_logger = PnlLogger::from_env(&cfg);
    let mut engine = PairTradeEngine::new(cfg, executor).with_pnl_logger(pnl_logger);
    let summary = engine.run(&mut feed)?;
    if engine.executor().has_position() {
        log::warn!("[SUMMARY] replay ended with a spread still open");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
