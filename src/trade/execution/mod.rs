use anyhow::Result;
use rust_decimal::Decimal;

use crate::rule::SpreadSide;
use crate::sizing::{LegPrices, LegSizes, SpreadOrder};

pub mod dry_run_executor;

/// A spread closed by the execution port.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub side: SpreadSide,
    pub entry: LegPrices,
    pub exit: LegPrices,
    pub sizes: LegSizes,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
}

impl ClosedTrade {
    pub fn net_pnl(&self) -> Decimal {
        self.gross_pnl - self.fees
    }
}

/// Where order intents go. Implementations own the book; the rule never sees it.
pub trait ExecutionPort {
    fn open_spread(&mut self, order: &SpreadOrder) -> Result<()>;

    /// Closes both legs at `prices`. Returns `None` when nothing was open.
    fn close_all(&mut self, prices: &LegPrices) -> Result<Option<ClosedTrade>>;

    fn equity(&self) -> Decimal;
}

/// Gross PnL of both legs between entry and exit prices.
pub fn compute_pnl(side: SpreadSide, sizes: &LegSizes, entry: &LegPrices, exit: &LegPrices) -> Decimal {
    let (pnl_a, pnl_b) = match side {
        SpreadSide::LongSpread => (
            (exit.price_a - entry.price_a) * sizes.size_a,
            (entry.price_b - exit.price_b) * sizes.size_b,
        ),
        SpreadSide::ShortSpread => (
            (entry.price_a - exit.price_a) * sizes.size_a,
            (exit.price_b - entry.price_b) * sizes.size_b,
        ),
    };
    pnl_a + pnl_b
}
