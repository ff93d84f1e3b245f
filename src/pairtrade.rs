use anyhow::{anyhow, Context, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::config::{env_parse, StrategyParams};
use crate::pnl_logger::{PnlLogRecord, PnlLogger};
use crate::ports::replay_feed::{Observation, ObservationFeed};
use crate::rule::{Action, Decision, ExitReason, PositionState, SpreadSide, ZScoreRule};
use crate::sizing::{leg_sizes, LegPrices, SpreadOrder};
use crate::stats::max_drawdown;
use crate::trade::execution::{ClosedTrade, ExecutionPort};
use crate::window::ZScoreWindow;

const DEFAULT_SYMBOL_A: &str = "SOLUSDT";
const DEFAULT_SYMBOL_B: &str = "ETHUSDT";
const DEFAULT_EQUITY_USD: Decimal = dec!(100000);
const DEFAULT_ALLOCATION_PCT: Decimal = dec!(0.2);
const DEFAULT_FEE_BPS: Decimal = dec!(4);
const DEFAULT_SIZE_STEP: Decimal = dec!(0.0001);
const DEFAULT_METRICS_LOG_EVERY: u64 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct PairTradeYaml {
    pair: Option<String>,
    lookback: Option<usize>,
    q_entry: Option<f64>,
    min_profit_pct: Option<f64>,
    hard_stop_z: Option<f64>,
    replay_file: Option<String>,
    equity_usd: Option<f64>,
    allocation_pct: Option<f64>,
    fee_bps: Option<f64>,
    size_step: Option<f64>,
    min_order: Option<f64>,
    metrics_log_every: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub base: String,
    pub quote: String,
}

impl FromStr for PairSpec {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let (base, quote) = raw
            .split_once('/')
            .ok_or_else(|| anyhow!("pair '{}' must look like BASE/QUOTE", raw))?;
        let base = base.trim();
        let quote = quote.trim();
        if base.is_empty() || quote.is_empty() {
            return Err(anyhow!("pair '{}' has an empty leg", raw));
        }
        if base == quote {
            return Err(anyhow!("pair '{}' uses the same symbol twice", raw));
        }
        Ok(Self {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PairTradeConfig {
    pub pair: PairSpec,
    pub params: StrategyParams,
    pub replay_file: Option<String>,
    pub equity_usd: Decimal,
    /// Fraction of equity committed to each leg on entry.
    pub allocation_pct: Decimal,
    pub fee_bps: Decimal,
    pub size_step: Decimal,
    pub min_order: Option<Decimal>,
    pub metrics_log_every: u64,
}

impl Default for PairTradeConfig {
    fn default() -> Self {
        Self {
            pair: PairSpec {
                base: DEFAULT_SYMBOL_A.to_string(),
                quote: DEFAULT_SYMBOL_B.to_string(),
            },
            params: StrategyParams::default(),
            replay_file: None,
            equity_usd: DEFAULT_EQUITY_USD,
            allocation_pct: DEFAULT_ALLOCATION_PCT,
            fee_bps: DEFAULT_FEE_BPS,
            size_step: DEFAULT_SIZE_STEP,
            min_order: None,
            metrics_log_every: DEFAULT_METRICS_LOG_EVERY,
        }
    }
}

fn to_decimal(name: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| anyhow!("{} is not a finite number: {}", name, value))
}

impl PairTradeConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRZ_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open pairz config {}", path_ref.display()))?;
        let yaml: PairTradeYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse pairz config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: PairTradeYaml) -> Result<Self> {
        let defaults = Self::default();
        let pair = match yaml.pair {
            Some(raw) => raw.parse()?,
            None => defaults.pair,
        };
        let params = StrategyParams::new(
            yaml.lookback.unwrap_or(defaults.params.lookback),
            yaml.q_entry.unwrap_or(defaults.params.q_entry),
            yaml.min_profit_pct.unwrap_or(defaults.params.min_profit_pct),
            yaml.hard_stop_z.unwrap_or(defaults.params.hard_stop_z),
        )?;
        let cfg = PairTradeConfig {
            pair,
            params,
            replay_file: yaml.replay_file,
            equity_usd: match yaml.equity_usd {
                Some(v) => to_decimal("equity_usd", v)?,
                None => defaults.equity_usd,
            },
            allocation_pct: match yaml.allocation_pct {
                Some(v) => to_decimal("allocation_pct", v)?,
                None => defaults.allocation_pct,
            },
            fee_bps: match yaml.fee_bps {
                Some(v) => to_decimal("fee_bps", v)?,
                None => defaults.fee_bps,
            },
            size_step: match yaml.size_step {
                Some(v) => to_decimal("size_step", v)?,
                None => defaults.size_step,
            },
            min_order: yaml
                .min_order
                .map(|v| to_decimal("min_order", v))
                .transpose()?,
            metrics_log_every: yaml
                .metrics_log_every
                .unwrap_or(defaults.metrics_log_every),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let (Ok(a), Ok(b)) = (env::var("SYMBOL_A"), env::var("SYMBOL_B")) {
            self.pair = format!("{}/{}", a, b).parse()?;
        }
        self.params = self.params.with_env_overrides()?;
        if let Ok(path) = env::var("REPLAY_FILE") {
            if !path.trim().is_empty() {
                self.replay_file = Some(path);
            }
        }
        if let Some(v) = env_parse::<Decimal>("EQUITY_USD")? {
            self.equity_usd = v;
        }
        if let Some(v) = env_parse::<Decimal>("ALLOCATION_PCT")? {
            self.allocation_pct = v;
        }
        if let Some(v) = env_parse::<Decimal>("FEE_BPS")? {
            self.fee_bps = v;
        }
        if let Some(v) = env_parse::<Decimal>("SIZE_STEP")? {
            self.size_step = v;
        }
        if let Some(v) = env_parse::<Decimal>("MIN_ORDER")? {
            self.min_order = Some(v);
        }
        if let Some(v) = env_parse::<u64>("METRICS_LOG_EVERY")? {
            self.metrics_log_every = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.equity_usd <= Decimal::ZERO {
            return Err(anyhow!("equity_usd must be positive"));
        }
        if self.allocation_pct <= Decimal::ZERO || self.allocation_pct > Decimal::ONE {
            return Err(anyhow!("allocation_pct must lie in (0, 1]"));
        }
        if self.fee_bps < Decimal::ZERO {
            return Err(anyhow!("fee_bps must not be negative"));
        }
        if self.size_step < Decimal::ZERO {
            return Err(anyhow!("size_step must not be negative"));
        }
        Ok(())
    }

    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.pair.base, self.pair.quote)
    }
}

/// Totals for one replay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub observations: u64,
    /// Observations whose z-score or prices were unusable.
    pub skipped: u64,
    pub entries: u64,
    pub exits_mean_reversion: u64,
    pub exits_hard_stop: u64,
    pub wins: u64,
    pub realized_pnl: Decimal,
    pub final_equity: Decimal,
    pub max_drawdown: f64,
    pub open_at_end: bool,
}

impl RunSummary {
    pub fn exits(&self) -> u64 {
        self.exits_mean_reversion + self.exits_hard_stop
    }
}

/// Drives one pair through the rule: window upkeep, intents, bookkeeping.
pub struct PairTradeEngine<E: ExecutionPort> {
    cfg: PairTradeConfig,
    rule: ZScoreRule,
    window: ZScoreWindow,
    state: PositionState,
    executor: E,
    pnl_logger: Option<PnlLogger>,
    summary: RunSummary,
    equity_curve: Vec<f64>,
}

impl<E: ExecutionPort> PairTradeEngine<E> {
    pub fn new(cfg: PairTradeConfig, executor: E) -> Self {
        let starting_equity = executor.equity();
        let summary = RunSummary {
            final_equity: starting_equity,
            ..RunSummary::default()
        };
        let rule = ZScoreRule::new(cfg.params);
        Self {
            window: rule.new_window(),
            rule,
            state: PositionState::Flat,
            executor,
            pnl_logger: None,
            summary,
            equity_curve: vec![starting_equity.to_f64().unwrap_or(0.0)],
            cfg,
        }
    }

    pub fn with_pnl_logger(mut self, logger: Option<PnlLogger>) -> Self {
        self.pnl_logger = logger;
        self
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn window(&self) -> &ZScoreWindow {
        &self.window
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Consumes the feed in order, logging and continuing past failed steps.
    pub fn run<F: ObservationFeed>(&mut self, feed: &mut F) -> Result<RunSummary> {
        log::info!(
            "[CONFIG] pair={} lookback={} q_entry={} min_profit_pct={} hard_stop_z={} fee_bps={} allocation_pct={}",
            self.cfg.pair_label(),
            self.cfg.params.lookback,
            self.cfg.params.q_entry,
            self.cfg.params.min_profit_pct,
            self.cfg.params.hard_stop_z,
            self.cfg.fee_bps,
            self.cfg.allocation_pct
        );
        while let Some(obs) = feed.next_observation() {
            if let Err(e) = self.step(&obs) {
                log::error!("[REPLAY] step at {} failed: {:?}", obs.timestamp, e);
            }
        }
        self.summary.open_at_end = !self.state.is_flat();
        log::info!(
            "[SUMMARY] observations={} skipped={} entries={} exits={} (mean_reversion={} hard_stop={}) wins={} realized_pnl={} final_equity={} max_drawdown={:.4} open_at_end={}",
            self.summary.observations,
            self.summary.skipped,
            self.summary.entries,
            self.summary.exits(),
            self.summary.exits_mean_reversion,
            self.summary.exits_hard_stop,
            self.summary.wins,
            self.summary.realized_pnl,
            self.summary.final_equity,
            self.summary.max_drawdown,
            self.summary.open_at_end
        );
        Ok(self.summary.clone())
    }

    /// Processes one observation. On error the position state is left as it was.
    pub fn step(&mut self, obs: &Observation) -> Result<Decision> {
        self.summary.observations += 1;
        let ratio = obs.ratio();
        let z = obs.z_or_nan();
        if !self.window.push(z) || !ratio.is_finite() || ratio <= 0.0 {
            self.summary.skipped += 1;
        }

        let decision = self.rule.evaluate(self.state, ratio, z, &self.window);
        self.maybe_log_metrics(obs, &decision);

        match decision.action {
            Action::Hold => Ok(decision),
            Action::Enter { side, entry_ratio } => self.enter(obs, side, entry_ratio, decision),
            Action::Exit {
                side,
                reason,
                profit_pct,
            } => self.exit(obs, side, reason, profit_pct, decision),
        }
    }

    fn enter(
        &mut self,
        obs: &Observation,
        side: SpreadSide,
        entry_ratio: f64,
        decision: Decision,
    ) -> Result<Decision> {
        let held = Decision {
            next: self.state,
            action: Action::Hold,
            thresholds: decision.thresholds,
        };
        let prices = LegPrices::from_f64(obs.price_a, obs.price_b)
            .ok_or_else(|| anyhow!("unusable leg prices {} / {}", obs.price_a, obs.price_b))?;
        let Some(sizes) = leg_sizes(
            self.executor.equity(),
            self.cfg.allocation_pct,
            &prices,
            self.cfg.size_step,
            self.cfg.min_order,
        ) else {
            log::warn!(
                "[ENTRY] {} signal at ratio {:.6} skipped: legs size to zero",
                side.label(),
                entry_ratio
            );
            return Ok(held);
        };
        let order = SpreadOrder {
            side,
            sizes,
            prices,
        };
        self.executor
            .open_spread(&order)
            .with_context(|| format!("failed to open {} spread", side.label()))?;

        self.state = decision.next;
        self.summary.entries += 1;
        log::info!(
            "[ENTRY] {} {} ratio={:.6} z={:.3} lower={:.3} upper={:.3} size_a={} size_b={}",
            self.cfg.pair_label(),
            side.label(),
            entry_ratio,
            obs.z_or_nan(),
            decision.thresholds.map(|t| t.lower).unwrap_or(f64::NAN),
            decision.thresholds.map(|t| t.upper).unwrap_or(f64::NAN),
            sizes.size_a,
            sizes.size_b
        );
        Ok(decision)
    }

    fn exit(
        &mut self,
        obs: &Observation,
        side: SpreadSide,
        reason: ExitReason,
        profit_pct: f64,
        decision: Decision,
    ) -> Result<Decision> {
        let entry_ratio = self.state.entry_ratio().unwrap_or(f64::NAN);
        let prices = LegPrices::from_f64(obs.price_a, obs.price_b)
            .ok_or_else(|| anyhow!("unusable leg prices {} / {}", obs.price_a, obs.price_b))?;
        let closed = self
            .executor
            .close_all(&prices)
            .with_context(|| format!("failed to close {} spread", side.label()))?;

        self.state = decision.next;
        match reason {
            ExitReason::MeanReversion => self.summary.exits_mean_reversion += 1,
            ExitReason::HardStop => self.summary.exits_hard_stop += 1,
        }
        log::info!(
            "[EXIT] {} {} reason={} ratio={:.6} entry_ratio={:.6} profit_pct={:.5} z={:.3}",
            self.cfg.pair_label(),
            side.label(),
            reason.label(),
            obs.ratio(),
            entry_ratio,
            profit_pct,
            obs.z_or_nan()
        );

        match closed {
            Some(trade) => self.book_trade(obs, &trade, reason, entry_ratio, profit_pct),
            None => log::warn!("[EXIT] executor reported no open spread to close"),
        }
        Ok(decision)
    }

    fn book_trade(
        &mut self,
        obs: &Observation,
        trade: &ClosedTrade,
        reason: ExitReason,
        entry_ratio: f64,
        profit_pct: f64,
    ) {
        let net = trade.net_pnl();
        self.summary.realized_pnl += net;
        if net > Decimal::ZERO {
            self.summary.wins += 1;
        }
        self.summary.final_equity = self.executor.equity();
        self.equity_curve
            .push(self.summary.final_equity.to_f64().unwrap_or(0.0));
        self.summary.max_drawdown = max_drawdown(&self.equity_curve);

        let record = PnlLogRecord {
            ts: obs.timestamp,
            pair: self.cfg.pair_label(),
            direction: trade.side.label().to_string(),
            entry_ratio,
            exit_ratio: obs.ratio(),
            profit_pct,
            pnl: net.to_f64().unwrap_or(0.0),
            fees: trade.fees.to_f64().unwrap_or(0.0),
            reason: reason.label().to_string(),
            source: "dry_run".to_string(),
        };
        if let Some(logger) = &mut self.pnl_logger {
            if let Err(err) = logger.log(&record) {
                log::warn!("[PNL] failed to write pnl log: {:?}", err);
            }
        }
    }

    fn maybe_log_metrics(&self, obs: &Observation, decision: &Decision) {
        let every = self.cfg.metrics_log_every;
        if every == 0 || self.summary.observations % every != 0 {
            return;
        }
        match decision.thresholds {
            Some(th) => log::debug!(
                "[METRICS] n={} ratio={:.6} z={:.3} lower={:.3} median={:.3} upper={:.3} state={:?}",
                self.summary.observations,
                obs.ratio(),
                obs.z_or_nan(),
                th.lower,
                th.median,
                th.upper,
                self.state
            ),
            None => log::debug!(
                "[METRICS] n={} warming up ({}/{})",
                self.summary.observations,
                self.window.len(),
                self.cfg.params.lookback
            ),
        }
    }
}
