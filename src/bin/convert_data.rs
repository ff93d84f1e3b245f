use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use pairz::ports::kline_csv::{
    align, build_observations, close_correlation, load_closes, DEFAULT_Z_WINDOW,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Merge two kline CSV caches into a replay file of ratio z-scores.
#[derive(Parser, Debug)]
#[command(name = "convert-data")]
struct Args {
    /// Kline CSV for leg A (numerator of the ratio).
    klines_a: PathBuf,

    /// Kline CSV for leg B.
    klines_b: PathBuf,

    /// Output JSONL replay file.
    out: PathBuf,

    /// Bars in the rolling ratio z-score.
    #[arg(default_value_t = DEFAULT_Z_WINDOW)]
    z_window: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let closes_a = load_closes(&args.klines_a)?;
    let closes_b = load_closes(&args.klines_b)?;
    let aligned = align(&closes_a, &closes_b);
    if aligned.is_empty() {
        return Err(anyhow!("the two kline files share no timestamps"));
    }
    log::info!(
        "aligned {} of {} / {} bars",
        aligned.len(),
        closes_a.len(),
        closes_b.len()
    );
    match close_correlation(&aligned) {
        Some(c) => log::info!("close correlation: {:.4}", c),
        None => log::warn!("close correlation undefined (flat series)"),
    }

    let observations = build_observations(&aligned, args.z_window);
    let file = File::create(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let mut writer = BufWriter::new(file);
    for obs in &observations {
        writeln!(writer, "{}", serde_json::to_string(obs)?)?;
    }
    writer.flush()?;
    log::info!(
        "wrote {} observations to {} (z window {})",
        observations.len(),
        args.out.display(),
        args.z_window
    );
    Ok(())
}
