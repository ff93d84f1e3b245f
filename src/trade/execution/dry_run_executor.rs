use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

use super::{compute_pnl, ClosedTrade, ExecutionPort};
use crate::rule::SpreadSide;
use crate::sizing::{LegPrices, LegSizes, SpreadOrder};

#[derive(Debug, Clone)]
struct OpenSpread {
    side: SpreadSide,
    entry: LegPrices,
    sizes: LegSizes,
    entry_fee: Decimal,
}

/// Fills every intent immediately at the observed prices and books PnL.
///
/// There is no order book: each leg is charged `fee_bps` of its notional on
/// the way in and on the way out.
#[derive(Debug)]
pub struct DryRunExecutor {
    equity: Decimal,
    fee_rate: Decimal,
    open: Option<OpenSpread>,
}

impl DryRunExecutor {
    pub fn new(starting_equity: Decimal, fee_bps: Decimal) -> Self {
        Self {
            equity: starting_equity,
            fee_rate: fee_bps / Decimal::from(10_000),
            open: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.open.is_some()
    }

    fn fee_for(&self, sizes: &LegSizes, prices: &LegPrices) -> Decimal {
        (sizes.size_a * prices.price_a + sizes.size_b * prices.price_b) * self.fee_rate
    }

    fn log_fill(&self, stage: &str, side: SpreadSide, sizes: &LegSizes, prices: &LegPrices) {
        log::info!(
            "[DRY_FILL] id={} stage={} side={} size_a={} price_a={} size_b={} price_b={}",
            rand::random::<u64>(),
            stage,
            side.label(),
            sizes.size_a,
            prices.price_a,
            sizes.size_b,
            prices.price_b
        );
    }
}

impl ExecutionPort for DryRunExecutor {
    fn open_spread(&mut self, order: &SpreadOrder) -> Result<()> {
        if self.open.is_some() {
            return Err(anyhow!("a spread is already open"));
        }
        let entry_fee = self.fee_for(&order.sizes, &order.prices);
        self.equity -= entry_fee;
        self.log_fill("entry", order.side, &order.sizes, &order.prices);
        self.open = Some(OpenSpread {
            side: order.side,
            entry: order.prices,
            sizes: order.sizes,
            entry_fee,
        });
        Ok(())
    }

    fn close_all(&mut self, prices: &LegPrices) -> Result<Option<ClosedTrade>> {
        let Some(open) = self.open.take() else {
            return Ok(None);
        };
        let gross_pnl = compute_pnl(open.side, &open.sizes, &open.entry, prices);
        let exit_fee = self.fee_for(&open.sizes, prices);
        self.equity += gross_pnl - exit_fee;
        self.log_fill("exit", open.side, &open.sizes, prices);
        Ok(Some(ClosedTrade {
            side: open.side,
            entry: open.entry,
            exit: *prices,
            sizes: open.sizes,
            gross_pnl,
            fees: open.entry_fee + exit_fee,
        }))
    }

    fn equity(&self) -> Decimal {
        self.equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: SpreadSide) -> SpreadOrder {
        SpreadOrder {
            side,
            sizes: LegSizes {
                size_a: dec!(10),
                size_b: dec!(5),
            },
            prices: LegPrices {
                price_a: dec!(100),
                price_b: dec!(200),
            },
        }
    }

    #[test]
    fn round_trip_books_net_pnl_into_equity() {
        let mut ex = DryRunExecutor::new(dec!(10000), dec!(4));
        ex.open_spread(&order(SpreadSide::LongSpread)).unwrap();
        // 2000 notional at 4 bps
        assert_eq!(ex.equity(), dec!(9999.2));

        let exit = LegPrices {
            price_a: dec!(102),
            price_b: dec!(200),
        };
        let trade = ex.close_all(&exit).unwrap().unwrap();
        assert_eq!(trade.gross_pnl, dec!(20));
        assert_eq!(trade.fees, dec!(0.8) + dec!(0.808));
        assert_eq!(trade.net_pnl(), dec!(18.392));
        assert_eq!(ex.equity(), dec!(10018.392));
        assert!(!ex.has_position());
    }

    #[test]
    fn second_open_is_rejected() {
        let mut ex = DryRunExecutor::new(dec!(10000), dec!(0));
        ex.open_spread(&order(SpreadSide::ShortSpread)).unwrap();
        assert!(ex.open_spread(&order(SpreadSide::LongSpread)).is_err());
        assert!(ex.has_position());
    }

    #[test]
    fn close_without_position_is_a_no_op() {
        let mut ex = DryRunExecutor::new(dec!(10000), dec!(4));
        let prices = order(SpreadSide::LongSpread).prices;
        assert!(ex.close_all(&prices).unwrap().is_none());
        assert_eq!(ex.equity(), dec!(10000));
    }
}
