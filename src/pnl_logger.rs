use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::pairtrade::PairTradeConfig;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// One line of the trade journal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PnlLogRecord {
    pub ts: i64,
    pub pair: String,
    pub direction: String,
    pub entry_ratio: f64,
    pub exit_ratio: f64,
    pub profit_pct: f64,
    pub pnl: f64,
    pub fees: f64,
    pub reason: String,
    pub source: String,
}

/// Appends closed trades as JSON lines, one file per UTC day of the trade.
pub struct PnlLogger {
    dir: PathBuf,
    tag: Option<String>,
    retain_days: u64,
    last_cleanup: Option<Instant>,
}

impl PnlLogger {
    pub fn new<P: Into<PathBuf>>(dir: P, tag: Option<&str>, retain_days: u64) -> Self {
        Self {
            dir: dir.into(),
            tag: tag.map(sanitize_pnl_tag).filter(|v| !v.is_empty()),
            retain_days: retain_days.max(1),
            last_cleanup: None,
        }
    }

    pub fn from_env(cfg: &PairTradeConfig) -> Option<Self> {
        let enabled = env::var("PAIRZ_PNL_LOG")
            .ok()
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                !(v == "0" || v == "false" || v == "no")
            })
            .unwrap_or(true);
        if !enabled {
            return None;
        }
        let dir = env::var("PAIRZ_PNL_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join("pairz_pnl"))
            })
            .unwrap_or_else(|| PathBuf::from("pairz_pnl"));
        let tag = env::var("PAIRZ_PNL_TAG")
            .ok()
            .unwrap_or_else(|| cfg.pair_label());
        let retain_days = env::var("PAIRZ_PNL_RETAIN_DAYS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(7);
        Some(Self::new(dir, Some(&tag), retain_days))
    }

    pub fn log(&mut self, record: &PnlLogRecord) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.log_path(record.ts);
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        self.maybe_cleanup();
        Ok(())
    }

    pub fn log_path(&self, ts_millis: i64) -> PathBuf {
        let date = Utc
            .timestamp_millis_opt(ts_millis)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d")
            .to_string();
        let mut name = String::from("pnl");
        if let Some(tag) = &self.tag {
            name.push('-');
            name.push_str(tag);
        }
        name.push('-');
        name.push_str(&date);
        name.push_str(".jsonl");
        self.dir.join(name)
    }

    fn maybe_cleanup(&mut self) {
        if let Some(last) = self.last_cleanup {
            if last.elapsed() < CLEANUP_INTERVAL {
                return;
            }
        }
        self.last_cleanup = Some(Instant::now());
        let removed = self.remove_expired(SystemTime::now());
        if removed > 0 {
            log::info!(
                "[PNL] removed {} journal file(s) older than {} days from {}",
                removed,
                self.retain_days,
                self.dir.display()
            );
        }
    }

    /// Deletes journal files last written more than `retain_days` before `now`.
    fn remove_expired(&self, now: SystemTime) -> usize {
        let retention = Duration::from_secs(self.retain_days.saturating_mul(86_400));
        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| is_pnl_log_file(&entry.path()))
            .filter(|entry| {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false)
            })
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}

fn sanitize_pnl_tag(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_pnl_log_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("pnl") && name.ends_with(".jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64) -> PnlLogRecord {
        PnlLogRecord {
            ts,
            pair: "SOLUSDT/ETHUSDT".to_string(),
            direction: "long_spread".to_string(),
            entry_ratio: 0.05,
            exit_ratio: 0.0502,
            profit_pct: 0.004,
            pnl: 12.5,
            fees: 1.6,
            reason: "mean_reversion".to_string(),
            source: "dry_run".to_string(),
        }
    }

    #[test]
    fn appends_records_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = PnlLogger::new(dir.path(), Some("SOLUSDT/ETHUSDT"), 7);
        // 2026-01-02T00:00:00Z
        let ts = 1_767_312_000_000;
        logger.log(&record(ts)).unwrap();
        logger.log(&record(ts + 60_000)).unwrap();

        let path = logger.log_path(ts);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "pnl-SOLUSDT_ETHUSDT-20260102.jsonl"
        );
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<PnlLogRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], record(ts));
    }

    #[test]
    fn expired_journal_files_are_removed_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("pnl-t-20250101.jsonl");
        let unrelated = dir.path().join("notes.jsonl");
        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 86_400);
        for path in [&stale, &unrelated] {
            fs::write(path, "{}\n").unwrap();
            fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(ten_days_ago)
                .unwrap();
        }

        let mut logger = PnlLogger::new(dir.path(), Some("t"), 7);
        logger.log(&record(1_767_312_000_000)).unwrap();

        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert!(logger.log_path(1_767_312_000_000).exists());
    }

    #[test]
    fn recent_journal_files_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let recent = dir.path().join("pnl-t-20260101.jsonl");
        fs::write(&recent, "{}\n").unwrap();
        let logger = PnlLogger::new(dir.path(), Some("t"), 7);
        assert_eq!(logger.remove_expired(SystemTime::now()), 0);
        let later = SystemTime::now() + Duration::from_secs(8 * 86_400);
        assert_eq!(logger.remove_expired(later), 1);
        assert!(!recent.exists());
    }

    #[test]
    fn recognises_only_journal_files() {
        assert!(is_pnl_log_file(Path::new("/tmp/pnl-x-20260101.jsonl")));
        assert!(!is_pnl_log_file(Path::new("/tmp/status.json")));
    }

    #[test]
    fn blank_tag_is_dropped() {
        let logger = PnlLogger::new("/tmp", Some("   "), 0);
        let name = logger.log_path(0);
        assert_eq!(name.file_name().unwrap().to_str().unwrap(), "pnl-19700101.jsonl");
    }
}
