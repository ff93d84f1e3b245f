use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One step of the pair: both leg closes and the ratio z-score for that bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub price_a: f64,
    pub price_b: f64,
    /// Missing while the upstream z-score is still warming up.
    pub z: Option<f64>,
}

impl Observation {
    pub fn ratio(&self) -> f64 {
        self.price_a / self.price_b
    }

    /// NaN stands in for a missing z so the rule treats it as "no action".
    pub fn z_or_nan(&self) -> f64 {
        self.z.unwrap_or(f64::NAN)
    }
}

pub trait ObservationFeed {
    /// Next observation in time order, `None` at the end of the feed.
    fn next_observation(&mut self) -> Option<Observation>;
}

/// Replays observations previously written as JSON lines.
#[derive(Debug)]
pub struct ReplayFeed {
    data: Vec<Observation>,
    cursor: usize,
}

impl ReplayFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open replay file {}", path_ref.display()))?;
        let reader = BufReader::new(file);
        let mut data = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("failed to read replay line {} of {}", lineno + 1, path_ref.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: Observation = serde_json::from_str(&line).with_context(|| {
                format!("failed to parse replay entry on line {}: '{}'", lineno + 1, line)
            })?;
            data.push(entry);
        }

        if data.is_empty() {
            return Err(anyhow!(
                "replay file {} is empty or invalid",
                path_ref.display()
            ));
        }
        if let Some(pos) = data
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(anyhow!(
                "replay file {} is not in time order at entry {}",
                path_ref.display(),
                pos + 2
            ));
        }
        log::info!(
            "[REPLAY] loaded {} observations from {}",
            data.len(),
            path_ref.display()
        );

        Ok(Self::from_entries(data))
    }

    pub fn from_entries(data: Vec<Observation>) -> Self {
        Self { data, cursor: 0 }
    }
}

impl ObservationFeed for ReplayFeed {
    fn next_observation(&mut self) -> Option<Observation> {
        let entry = self.data.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(entry)
    }
}
