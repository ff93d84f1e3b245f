use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::rule::SpreadSide;

/// Sizes for both legs of a spread entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegSizes {
    pub size_a: Decimal,
    pub size_b: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegPrices {
    pub price_a: Decimal,
    pub price_b: Decimal,
}

impl LegPrices {
    pub fn from_f64(price_a: f64, price_b: f64) -> Option<Self> {
        let price_a = Decimal::from_f64(price_a)?;
        let price_b = Decimal::from_f64(price_b)?;
        if price_a <= Decimal::ZERO || price_b <= Decimal::ZERO {
            return None;
        }
        Some(Self { price_a, price_b })
    }
}

/// Entry request handed to the execution port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadOrder {
    pub side: SpreadSide,
    pub sizes: LegSizes,
    pub prices: LegPrices,
}

/// Spends `allocation_pct` of equity on each leg at the current prices.
///
/// Returns `None` when either leg quantizes to zero or a size does not fit in
/// a `Decimal`.
pub fn leg_sizes(
    equity: Decimal,
    allocation_pct: Decimal,
    prices: &LegPrices,
    size_step: Decimal,
    min_order: Option<Decimal>,
) -> Option<LegSizes> {
    if equity <= Decimal::ZERO || allocation_pct <= Decimal::ZERO {
        return None;
    }
    let budget = equity.checked_mul(allocation_pct)?;
    let size_a = quantize_size_by_step(budget.checked_div(prices.price_a)?, size_step, min_order);
    let size_b = quantize_size_by_step(budget.checked_div(prices.price_b)?, size_step, min_order);
    if size_a <= Decimal::ZERO || size_b <= Decimal::ZERO {
        return None;
    }
    Some(LegSizes { size_a, size_b })
}

/// Rounds `size` down to a multiple of `step`, lifting it to `min_order` when smaller.
///
/// A size below one step (and without a minimum order) quantizes to zero, as
/// does one whose step count overflows.
pub fn quantize_size_by_step(size: Decimal, step: Decimal, min_order: Option<Decimal>) -> Decimal {
    if step <= Decimal::ZERO {
        return size;
    }
    let Some(mut multiples) = size.checked_div(step).map(|m| m.trunc()) else {
        return Decimal::ZERO;
    };
    if let Some(mo) = min_order {
        if mo > Decimal::ZERO {
            let Some(min_multiplier) = mo.checked_div(step).map(|m| m.ceil()) else {
                return Decimal::ZERO;
            };
            if min_multiplier > multiples {
                multiples = min_multiplier;
            }
        }
    }
    multiples.checked_mul(step).unwrap_or(Decimal::ZERO)
}
