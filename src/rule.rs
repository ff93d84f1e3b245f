//! Quantile-gated pairs z-score rule.
//!
//! Each step compares the current z-score of `price_a / price_b` against
//! thresholds taken from the trailing z-score window: the `q_entry` and
//! `1 - q_entry` percentiles for entries and the median for mean-reversion
//! exits. A profit floor gates the reversion exit and a fixed |z| hard stop
//! closes the spread unconditionally.

use serde::Serialize;

use crate::config::StrategyParams;
use crate::window::ZScoreWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadSide {
    /// Long A / short B.
    LongSpread,
    /// Short A / long B.
    ShortSpread,
}

impl SpreadSide {
    pub fn sign(self) -> f64 {
        match self {
            SpreadSide::LongSpread => 1.0,
            SpreadSide::ShortSpread => -1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpreadSide::LongSpread => "long_spread",
            SpreadSide::ShortSpread => "short_spread",
        }
    }
}

/// Position held on the pair. The entry ratio only exists while a spread is open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    LongSpread {
        entry_ratio: f64,
    },
    ShortSpread {
        entry_ratio: f64,
    },
}

impl PositionState {
    pub fn open(side: SpreadSide, entry_ratio: f64) -> Self {
        match side {
            SpreadSide::LongSpread => PositionState::LongSpread { entry_ratio },
            SpreadSide::ShortSpread => PositionState::ShortSpread { entry_ratio },
        }
    }

    pub fn side(&self) -> Option<SpreadSide> {
        match self {
            PositionState::Flat => None,
            PositionState::LongSpread { .. } => Some(SpreadSide::LongSpread),
            PositionState::ShortSpread { .. } => Some(SpreadSide::ShortSpread),
        }
    }

    pub fn entry_ratio(&self) -> Option<f64> {
        match self {
            PositionState::Flat => None,
            PositionState::LongSpread { entry_ratio }
            | PositionState::ShortSpread { entry_ratio } => Some(*entry_ratio),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

impl Thresholds {
    pub fn from_window(window: &ZScoreWindow, q_entry: f64) -> Option<Self> {
        let upper = window.percentile(q_entry * 100.0)?;
        let lower = window.percentile((1.0 - q_entry) * 100.0)?;
        let median = window.percentile(50.0)?;
        debug_assert!(lower <= upper, "lower {} above upper {}", lower, upper);
        Some(Self {
            lower,
            median,
            upper,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MeanReversion,
    HardStop,
}

impl ExitReason {
    pub fn label(self) -> &'static str {
        match self {
            ExitReason::MeanReversion => "mean_reversion",
            ExitReason::HardStop => "hard_stop",
        }
    }
}

/// Order intent emitted by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Hold,
    Enter {
        side: SpreadSide,
        entry_ratio: f64,
    },
    Exit {
        side: SpreadSide,
        reason: ExitReason,
        profit_pct: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub next: PositionState,
    pub action: Action,
    /// `None` while warming up or when the input was rejected.
    pub thresholds: Option<Thresholds>,
}

impl Decision {
    fn hold(state: PositionState, thresholds: Option<Thresholds>) -> Self {
        Self {
            next: state,
            action: Action::Hold,
            thresholds,
        }
    }
}

/// Gross move of the ratio since entry, signed so that a favourable move is positive.
pub fn profit_pct(side: SpreadSide, entry_ratio: f64, ratio: f64) -> f64 {
    (ratio / entry_ratio - 1.0) * side.sign()
}

#[derive(Debug, Clone)]
pub struct ZScoreRule {
    params: StrategyParams,
}

impl ZScoreRule {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Empty window sized to `lookback`, the only length `evaluate` expects.
    pub fn new_window(&self) -> ZScoreWindow {
        ZScoreWindow::new(self.params.lookback)
    }

    /// Decides the next state from the current one.
    ///
    /// `window` must already contain `z` when `z` is finite; a window not
    /// sized to `lookback` is never ready and only yields holds. The call has no
    /// side effects, so repeating it with the same arguments yields the same
    /// decision.
    pub fn evaluate(
        &self,
        state: PositionState,
        ratio: f64,
        z: f64,
        window: &ZScoreWindow,
    ) -> Decision {
        if !z.is_finite() || !ratio.is_finite() || ratio <= 0.0 {
            return Decision::hold(state, None);
        }
        if window.capacity() != self.params.lookback || !window.is_ready() {
            return Decision::hold(state, None);
        }
        let Some(th) = Thresholds::from_window(window, self.params.q_entry) else {
            return Decision::hold(state, None);
        };

        let (side, entry_ratio) = match state {
            PositionState::Flat => return self.decide_entry(ratio, z, th),
            PositionState::LongSpread { entry_ratio } => (SpreadSide::LongSpread, entry_ratio),
            PositionState::ShortSpread { entry_ratio } => (SpreadSide::ShortSpread, entry_ratio),
        };

        let profit = profit_pct(side, entry_ratio, ratio);
        let reverted = match side {
            SpreadSide::LongSpread => z >= th.median,
            SpreadSide::ShortSpread => z <= th.median,
        };
        let reason = if reverted && profit > self.params.min_profit_pct {
            Some(ExitReason::MeanReversion)
        } else if z.abs() > self.params.hard_stop_z {
            Some(ExitReason::HardStop)
        } else {
            None
        };
        match reason {
            Some(reason) => Decision {
                next: PositionState::Flat,
                action: Action::Exit {
                    side,
                    reason,
                    profit_pct: profit,
                },
                thresholds: Some(th),
            },
            None => Decision::hold(state, Some(th)),
        }
    }

    fn decide_entry(&self, ratio: f64, z: f64, th: Thresholds) -> Decision {
        let side = if z < th.lower {
            SpreadSide::LongSpread
        } else if z > th.upper {
            SpreadSide::ShortSpread
        } else {
            return Decision::hold(PositionState::Flat, Some(th));
        };
        Decision {
            next: PositionState::open(side, ratio),
            action: Action::Enter {
                side,
                entry_ratio: ratio,
            },
            thresholds: Some(th),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lookback: usize) -> StrategyParams {
        StrategyParams::new(lookback, 0.98, 0.0025, 5.0).unwrap()
    }

    fn window_of(capacity: usize, values: &[f64]) -> ZScoreWindow {
        let mut w = ZScoreWindow::new(capacity);
        for v in values {
            w.push(*v);
        }
        w
    }

    /// Window of `n` values spread evenly over [-2, 2].
    fn spread_window(n: usize) -> ZScoreWindow {
        let values: Vec<f64> = (0..n)
            .map(|i| -2.0 + 4.0 * i as f64 / (n - 1) as f64)
            .collect();
        window_of(n, &values)
    }

    #[test]
    fn warm_up_stays_flat_without_intents() {
        let rule = ZScoreRule::new(params(5));
        let mut w = ZScoreWindow::new(5);
        let mut state = PositionState::Flat;
        for z in [-9.0, 9.0, -9.0, 9.0] {
            w.push(z);
            let d = rule.evaluate(state, 1.0, z, &w);
            assert_eq!(d.action, Action::Hold);
            assert_eq!(d.next, PositionState::Flat);
            assert!(d.thresholds.is_none());
            state = d.next;
        }
    }

    #[test]
    fn window_of_another_length_never_trades() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(60);
        w.push(-3.0);
        let d = rule.evaluate(PositionState::Flat, 1.0, -3.0, &w);
        assert_eq!(d.action, Action::Hold);
        assert!(d.thresholds.is_none());
    }

    #[test]
    fn enters_long_below_lower_threshold() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(-3.0);
        let d = rule.evaluate(PositionState::Flat, 1.23, -3.0, &w);
        assert_eq!(
            d.next,
            PositionState::LongSpread { entry_ratio: 1.23 }
        );
        assert_eq!(
            d.action,
            Action::Enter {
                side: SpreadSide::LongSpread,
                entry_ratio: 1.23
            }
        );
        assert!(-3.0 < d.thresholds.unwrap().lower);
    }

    #[test]
    fn enters_short_above_upper_threshold() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(3.0);
        let d = rule.evaluate(PositionState::Flat, 0.8, 3.0, &w);
        assert_eq!(d.next, PositionState::ShortSpread { entry_ratio: 0.8 });
    }

    #[test]
    fn no_entry_inside_thresholds() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(0.3);
        let d = rule.evaluate(PositionState::Flat, 1.0, 0.3, &w);
        assert_eq!(d.action, Action::Hold);
        assert!(d.thresholds.is_some());
    }

    #[test]
    fn hard_stop_exits_even_at_a_loss() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(6.0);
        let state = PositionState::LongSpread { entry_ratio: 1.0 };
        // ratio fell: long spread is losing
        let d = rule.evaluate(state, 0.97, 6.0, &w);
        assert_eq!(d.next, PositionState::Flat);
        match d.action {
            Action::Exit {
                reason, profit_pct, ..
            } => {
                assert_eq!(reason, ExitReason::HardStop);
                assert!(profit_pct < 0.0);
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[test]
    fn hard_stop_applies_to_short_spread_on_negative_z() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(-5.5);
        let state = PositionState::ShortSpread { entry_ratio: 1.0 };
        let d = rule.evaluate(state, 1.05, -5.5, &w);
        assert_eq!(d.next, PositionState::Flat);
    }

    #[test]
    fn median_cross_without_profit_holds() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(0.5);
        let state = PositionState::LongSpread { entry_ratio: 1.0 };
        // 0.1% gain is below the 0.25% floor
        let d = rule.evaluate(state, 1.001, 0.5, &w);
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.next, state);
    }

    #[test]
    fn profit_exactly_at_floor_holds() {
        let rule = ZScoreRule::new(StrategyParams::new(50, 0.98, 0.25, 5.0).unwrap());
        let mut w = spread_window(50);
        w.push(0.5);
        let state = PositionState::LongSpread { entry_ratio: 1.0 };
        let d = rule.evaluate(state, 1.25, 0.5, &w);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn median_cross_with_profit_exits() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(0.5);
        let state = PositionState::LongSpread { entry_ratio: 1.0 };
        let d = rule.evaluate(state, 1.01, 0.5, &w);
        assert_eq!(d.next, PositionState::Flat);
        assert!(matches!(
            d.action,
            Action::Exit {
                reason: ExitReason::MeanReversion,
                ..
            }
        ));
    }

    #[test]
    fn short_spread_exits_below_median_with_profit() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(-0.5);
        let state = PositionState::ShortSpread { entry_ratio: 1.0 };
        let d = rule.evaluate(state, 0.99, -0.5, &w);
        assert_eq!(d.next, PositionState::Flat);
        // ratio rising against a short spread is a loss, so it holds
        let d = rule.evaluate(state, 1.01, -0.5, &w);
        assert_eq!(d.next, state);
    }

    #[test]
    fn long_spread_does_not_exit_below_median() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(-1.0);
        let state = PositionState::LongSpread { entry_ratio: 1.0 };
        let d = rule.evaluate(state, 1.05, -1.0, &w);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rule = ZScoreRule::new(params(50));
        let mut w = spread_window(50);
        w.push(-3.0);
        let state = PositionState::Flat;
        let first = rule.evaluate(state, 1.1, -3.0, &w);
        let second = rule.evaluate(state, 1.1, -3.0, &w);
        assert_eq!(first, second);

        let open = PositionState::LongSpread { entry_ratio: 1.0 };
        assert_eq!(
            rule.evaluate(open, 1.0005, 0.1, &w),
            rule.evaluate(open, 1.0005, 0.1, &w)
        );
    }

    #[test]
    fn non_finite_inputs_hold_without_touching_state() {
        let rule = ZScoreRule::new(params(50));
        let w = spread_window(50);
        let open = PositionState::ShortSpread { entry_ratio: 1.2 };
        for (ratio, z) in [
            (1.0, f64::NAN),
            (1.0, f64::INFINITY),
            (f64::NAN, 0.0),
            (0.0, 0.0),
            (-1.0, 9.0),
        ] {
            let d = rule.evaluate(open, ratio, z, &w);
            assert_eq!(d.next, open);
            assert_eq!(d.action, Action::Hold);
            let d = rule.evaluate(PositionState::Flat, ratio, z, &w);
            assert_eq!(d.next, PositionState::Flat);
        }
    }

    #[test]
    fn degenerate_window_never_enters() {
        let rule = ZScoreRule::new(params(10));
        let mut w = window_of(10, &[1.0; 10]);
        w.push(1.0);
        let d = rule.evaluate(PositionState::Flat, 1.0, 1.0, &w);
        let th = d.thresholds.unwrap();
        assert_eq!(th.lower, th.upper);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn random_walk_respects_state_invariants() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let rule = ZScoreRule::new(params(20));
        let mut rng = StdRng::seed_from_u64(7);
        let mut w = rule.new_window();
        let mut state = PositionState::Flat;
        let mut entries = 0;
        for step in 0..5000 {
            let z: f64 = rng.gen_range(-7.0..7.0);
            let ratio: f64 = rng.gen_range(0.9..1.1);
            w.push(z);
            let d = rule.evaluate(state, ratio, z, &w);
            if step + 1 < 20 {
                assert_eq!(d.action, Action::Hold);
                assert!(d.next.is_flat());
            }
            match d.action {
                Action::Enter { .. } => {
                    assert!(state.is_flat());
                    entries += 1;
                }
                Action::Exit { .. } => assert!(!state.is_flat()),
                Action::Hold => assert_eq!(d.next, state),
            }
            if !state.is_flat() && z.abs() > 5.0 {
                assert!(d.next.is_flat());
            }
            assert_eq!(d.next.is_flat(), d.next.entry_ratio().is_none());
            state = d.next;
        }
        assert!(entries > 0);
    }

    #[test]
    fn lookback_three_scenario_enters_then_exits() {
        let rule = ZScoreRule::new(params(3));
        let mut w = window_of(3, &[-2.0, -1.0, 0.0]);

        w.push(-2.5);
        let d = rule.evaluate(PositionState::Flat, 1.0, -2.5, &w);
        assert_eq!(d.next, PositionState::LongSpread { entry_ratio: 1.0 });

        w.push(-0.5);
        let d = rule.evaluate(d.next, 1.01, -0.5, &w);
        assert_eq!(d.next, PositionState::Flat);
        match d.action {
            Action::Exit {
                reason, profit_pct, ..
            } => {
                assert_eq!(reason, ExitReason::MeanReversion);
                assert!((profit_pct - 0.01).abs() < 1e-9);
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }
}
