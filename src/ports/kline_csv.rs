use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::ports::replay_feed::Observation;
use crate::stats::{correlation, mean_std};

pub const DEFAULT_Z_WINDOW: usize = 200;

/// Close price of one kline, timestamp in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseSample {
    pub ts: i64,
    pub close: f64,
}

/// Reads a cached kline CSV (time, open, high, low, close, volume).
///
/// The time column is the first one whatever its header says; it may hold
/// `%Y-%m-%d %H:%M:%S`, RFC 3339 or epoch milliseconds.
pub fn load_closes<P: AsRef<Path>>(path: P) -> Result<Vec<CloseSample>> {
    let path_ref = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path_ref)
        .with_context(|| format!("failed to open kline file {}", path_ref.display()))?;
    let close_idx = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path_ref.display()))?
        .iter()
        .position(|h| h.eq_ignore_ascii_case("close"))
        .ok_or_else(|| anyhow!("{} has no 'close' column", path_ref.display()))?;

    let mut samples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("bad row {} in {}", row + 1, path_ref.display()))?;
        let raw_ts = record
            .get(0)
            .ok_or_else(|| anyhow!("row {} in {} has no time", row + 1, path_ref.display()))?;
        let ts = parse_timestamp_ms(raw_ts)
            .with_context(|| format!("row {} in {}", row + 1, path_ref.display()))?;
        let close: f64 = record
            .get(close_idx)
            .ok_or_else(|| anyhow!("row {} in {} has no close", row + 1, path_ref.display()))?
            .parse()
            .with_context(|| format!("row {} in {}: close", row + 1, path_ref.display()))?;
        samples.push(CloseSample { ts, close });
    }
    samples.sort_by_key(|s| s.ts);
    samples.dedup_by_key(|s| s.ts);
    Ok(samples)
}

pub fn parse_timestamp_ms(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    Err(anyhow!("unrecognised timestamp '{}'", raw))
}

/// Keeps only timestamps present in both series, as `(ts, close_a, close_b)`.
pub fn align(a: &[CloseSample], b: &[CloseSample]) -> Vec<(i64, f64, f64)> {
    let b_by_ts: BTreeMap<i64, f64> = b.iter().map(|s| (s.ts, s.close)).collect();
    a.iter()
        .filter_map(|s| b_by_ts.get(&s.ts).map(|close_b| (s.ts, s.close, *close_b)))
        .collect()
}

pub fn close_correlation(aligned: &[(i64, f64, f64)]) -> Option<f64> {
    let a: Vec<f64> = aligned.iter().map(|r| r.1).collect();
    let b: Vec<f64> = aligned.iter().map(|r| r.2).collect();
    correlation(&a, &b)
}

/// Turns aligned closes into observations carrying the rolling z-score of
/// `close_a / close_b` over `window` bars (population standard deviation).
pub fn build_observations(aligned: &[(i64, f64, f64)], window: usize) -> Vec<Observation> {
    let window = window.max(1);
    let mut ratios: VecDeque<f64> = VecDeque::with_capacity(window);
    let mut out = Vec::with_capacity(aligned.len());
    for &(ts, price_a, price_b) in aligned {
        let ratio = price_a / price_b;
        let mut z = None;
        if ratio.is_finite() {
            if ratios.len() >= window {
                ratios.pop_front();
            }
            ratios.push_back(ratio);
            if ratios.len() == window {
                if let Some((mean, std)) = mean_std(&ratios) {
                    if std > 1e-12 {
                        z = Some((ratio - mean) / std);
                    }
                }
            }
        }
        out.push(Observation {
            timestamp: ts,
            price_a,
            price_b,
            z,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_supported_timestamp_layouts() {
        assert_eq!(parse_timestamp_ms("1767225600000").unwrap(), 1_767_225_600_000);
        assert_eq!(
            parse_timestamp_ms("2026-01-01 00:00:00").unwrap(),
            1_767_225_600_000
        );
        assert_eq!(
            parse_timestamp_ms("2026-01-01T01:00:00+01:00").unwrap(),
            1_767_225_600_000
        );
        assert!(parse_timestamp_ms("yesterday").is_err());
    }

    #[test]
    fn loads_pandas_style_cache() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,open,high,low,close,volume").unwrap();
        writeln!(file, "2026-01-01 00:01:00,1,1,1,101.5,10").unwrap();
        writeln!(file, "2026-01-01 00:00:00,1,1,1,100.0,10").unwrap();
        let closes = load_closes(file.path()).unwrap();
        assert_eq!(closes.len(), 2);
        assert_eq!(closes[0].close, 100.0);
        assert_eq!(closes[1].ts - closes[0].ts, 60_000);
    }

    #[test]
    fn missing_close_column_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,price").unwrap();
        writeln!(file, "0,1").unwrap();
        assert!(load_closes(file.path()).is_err());
    }

    #[test]
    fn align_keeps_common_timestamps() {
        let a = [
            CloseSample { ts: 1, close: 10.0 },
            CloseSample { ts: 2, close: 11.0 },
            CloseSample { ts: 3, close: 12.0 },
        ];
        let b = [
            CloseSample { ts: 2, close: 5.0 },
            CloseSample { ts: 3, close: 6.0 },
            CloseSample { ts: 4, close: 7.0 },
        ];
        assert_eq!(align(&a, &b), vec![(2, 11.0, 5.0), (3, 12.0, 6.0)]);
    }

    #[test]
    fn z_is_missing_until_window_fills() {
        let aligned = vec![
            (0, 1.0, 1.0),
            (1, 3.0, 1.0),
            (2, 1.0, 1.0),
            (3, 1.0, 1.0),
        ];
        let obs = build_observations(&aligned, 2);
        assert_eq!(obs[0].z, None);
        // window [1, 3]: mean 2, std 1
        assert_eq!(obs[1].z, Some(1.0));
        assert_eq!(obs[2].z, Some(-1.0));
        // window [1, 1] has zero spread
        assert_eq!(obs[3].z, None);
    }

    #[test]
    fn correlation_of_aligned_closes() {
        let aligned = vec![(0, 1.0, 2.0), (1, 2.0, 4.0), (2, 3.0, 6.0)];
        assert!((close_correlation(&aligned).unwrap() - 1.0).abs() < 1e-12);
    }
}
