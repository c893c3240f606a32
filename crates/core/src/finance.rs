//! Financial reconciliation for checkout orders.
//!
//! All functions are pure. Money is `Decimal` in memory and integer cents at
//! rest; finalized values go through [`round_money`] / [`round_percent`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::order::LineItem;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub value: Decimal,
    pub percent: Decimal,
}

/// Absolute value rounded half-up to two decimals.
pub fn round_money(value: Decimal) -> Decimal {
    half_up(value.abs(), 2)
}

/// Absolute value rounded half-up to a whole percent, as sent to the CRM.
pub fn round_percent(value: Decimal) -> Decimal {
    half_up(value.abs(), 0)
}

pub fn to_minor_units(value: Decimal) -> i64 {
    // i64 cents cover every amount this system stores
    half_up(value * Decimal::ONE_HUNDRED, 0).to_i64().unwrap_or_default()
}

pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Tax rate in percent implied by a gross total.
///
/// Returns zero when there is no tax, when the tax is not smaller than the
/// total, or when the net amount left after shipping is not positive.
pub fn tax_rate(total: Decimal, tax_value: Decimal, shipping: Decimal) -> Decimal {
    if tax_value.is_zero() || total <= tax_value {
        return Decimal::ZERO;
    }

    let net = (total - shipping) - tax_value;
    if net <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    tax_value * Decimal::ONE_HUNDRED / net
}

/// Order-level discount derived from the difference between the line
/// baseline and what the client actually pays for goods.
pub fn discount(
    items: &[LineItem],
    total: Decimal,
    tax_value: Decimal,
    shipping: Decimal,
) -> Discount {
    let baseline: Decimal = items.iter().filter(|item| !item.is_shipping).map(|item| item.total).sum();
    if baseline.is_zero() {
        return Discount::default();
    }

    let actual = total - tax_value - shipping;
    let value = baseline - actual;

    Discount { value, percent: value / baseline * Decimal::ONE_HUNDRED }
}

/// Spreads one discount percent over every non-shipping line so the
/// discounted line values add up to `net_total - shipping` to the cent.
///
/// Lines are discounted from `price * quantity`, never from a previously
/// discounted value, so calling this twice gives the same result. The
/// rounding residual lands on the line with the largest gross value.
/// Returns the applied percent (two decimals).
pub fn recalc_with_discount(items: &mut [LineItem], net_total: Decimal, shipping: Decimal) -> Decimal {
    let target = half_up(net_total - shipping, 2);
    let baseline: Decimal =
        items.iter().filter(|item| !item.is_shipping).map(LineItem::gross_value).sum();

    let percent = if baseline.is_zero() {
        Decimal::ZERO
    } else {
        half_up((baseline - target) / baseline * Decimal::ONE_HUNDRED, 2)
    };

    let mut allocated = Decimal::ZERO;
    let mut largest: Option<(usize, Decimal)> = None;

    for (index, item) in items.iter_mut().enumerate() {
        if item.is_shipping {
            item.discount_percent = Decimal::ZERO;
            item.net_total = item.total;
            continue;
        }

        let gross = item.gross_value();
        item.discount_percent = percent;
        item.net_total =
            if baseline.is_zero() { Decimal::ZERO } else { half_up(gross * target / baseline, 2) };
        allocated += item.net_total;

        if largest.map_or(true, |(_, value)| gross > value) {
            largest = Some((index, gross));
        }
    }

    if let Some((index, _)) = largest {
        let residual = target - allocated;
        if !residual.is_zero() && !baseline.is_zero() {
            items[index].net_total += residual;
        }
    }

    percent
}

/// Items split for a CRM create call: the first `limit` travel embedded in
/// the create payload, the rest follow as append calls of at most `limit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunked<T> {
    pub embedded: Vec<T>,
    pub chunks: Vec<Vec<T>>,
}

pub fn split_chunks<T>(items: Vec<T>, limit: usize) -> Chunked<T> {
    let limit = limit.max(1);
    let mut rest = items;
    let tail = rest.split_off(rest.len().min(limit));
    let embedded = rest;

    let mut chunks = Vec::new();
    let mut rest = tail;
    while !rest.is_empty() {
        let tail = rest.split_off(rest.len().min(limit));
        chunks.push(rest);
        rest = tail;
    }

    Chunked { embedded, chunks }
}

fn half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}
