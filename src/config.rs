use rust_decimal::Error as DecimalParseError;
use std::env;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;

pub const DEFAULT_LOOKBACK: usize = 1000;
pub const DEFAULT_Q_ENTRY: f64 = 0.98;
pub const DEFAULT_MIN_PROFIT_PCT: f64 = 0.0025;
pub const DEFAULT_HARD_STOP_Z: f64 = 5.0;

#[derive(Debug)]
pub enum ConfigError {
    ParseIntError(ParseIntError),
    ParseFloatError(ParseFloatError),
    DecimalParseError(DecimalParseError),
    InvalidParam(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ParseIntError(e) => write!(f, "Parse int error: {}", e),
            ConfigError::ParseFloatError(e) => write!(f, "Parse float error: {}", e),
            ConfigError::DecimalParseError(e) => write!(f, "Decimal parse error: {}", e),
            ConfigError::InvalidParam(e) => write!(f, "Invalid parameter: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ParseIntError> for ConfigError {
    fn from(err: ParseIntError) -> ConfigError {
        ConfigError::ParseIntError(err)
    }
}

impl From<ParseFloatError> for ConfigError {
    fn from(err: ParseFloatError) -> ConfigError {
        ConfigError::ParseFloatError(err)
    }
}

impl From<rust_decimal::Error> for ConfigError {
    fn from(err: rust_decimal::Error) -> ConfigError {
        ConfigError::DecimalParseError(err)
    }
}

/// Immutable parameters of the quantile z-score rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    /// Observations required before trading; also the quantile window length.
    pub lookback: usize,
    /// Entry quantile; thresholds sit at `q_entry` and `1 - q_entry`.
    pub q_entry: f64,
    /// Gross move (fraction of entry ratio) required for a mean-reversion exit.
    pub min_profit_pct: f64,
    /// |z| beyond which an open spread is closed unconditionally.
    pub hard_stop_z: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
            q_entry: DEFAULT_Q_ENTRY,
            min_profit_pct: DEFAULT_MIN_PROFIT_PCT,
            hard_stop_z: DEFAULT_HARD_STOP_Z,
        }
    }
}

impl StrategyParams {
    pub fn new(
        lookback: usize,
        q_entry: f64,
        min_profit_pct: f64,
        hard_stop_z: f64,
    ) -> Result<Self, ConfigError> {
        let params = Self {
            lookback,
            q_entry,
            min_profit_pct,
            hard_stop_z,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback < 1 {
            return Err(ConfigError::InvalidParam(
                "lookback must be at least 1".to_owned(),
            ));
        }
        if !(self.q_entry > 0.5 && self.q_entry < 1.0) {
            return Err(ConfigError::InvalidParam(format!(
                "q_entry must lie in (0.5, 1.0), got {}",
                self.q_entry
            )));
        }
        if !(self.min_profit_pct.is_finite() && self.min_profit_pct >= 0.0) {
            return Err(ConfigError::InvalidParam(format!(
                "min_profit_pct must be >= 0, got {}",
                self.min_profit_pct
            )));
        }
        if !(self.hard_stop_z.is_finite() && self.hard_stop_z > 0.0) {
            return Err(ConfigError::InvalidParam(format!(
                "hard_stop_z must be > 0, got {}",
                self.hard_stop_z
            )));
        }
        Ok(())
    }

    /// Overrides fields from `LOOKBACK`, `Q_ENTRY`, `MIN_PROFIT_PCT` and
    /// `HARD_STOP_Z` when set, then validates.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse::<usize>("LOOKBACK")? {
            self.lookback = v;
        }
        if let Some(v) = env_parse::<f64>("Q_ENTRY")? {
            self.q_entry = v;
        }
        if let Some(v) = env_parse::<f64>("MIN_PROFIT_PCT")? {
            self.min_profit_pct = v;
        }
        if let Some(v) = env_parse::<f64>("HARD_STOP_Z")? {
            self.hard_stop_z = v;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Reads and parses an environment variable; unset or blank yields `None`.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    ConfigError: From<T::Err>,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(raw.trim().parse::<T>()?)),
        _ => Ok(None),
    }
}
