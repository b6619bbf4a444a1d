//! Money calculation using rust_decimal
//!
//! Every order mutation ends in [`refresh_totals`]; nothing else writes
//! `line_total`, `subtotal`, `tax` or `total`.

use rust_decimal::prelude::*;
use shared::models::{Order, OrderLine, SelectedCustomization};

/// Currency minor unit (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Round to the currency minor unit, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Unit price plus every selected modifier
pub fn unit_price_with_modifiers(
    unit_price: Decimal,
    customizations: &[SelectedCustomization],
) -> Decimal {
    customizations
        .iter()
        .fold(unit_price, |acc, c| acc + c.price_modifier)
}

/// quantity × (unit price + Σ modifiers)
pub fn line_total(
    quantity: i32,
    unit_price: Decimal,
    customizations: &[SelectedCustomization],
) -> Decimal {
    round_money(Decimal::from(quantity) * unit_price_with_modifiers(unit_price, customizations))
}

fn line_total_of(line: &OrderLine) -> Decimal {
    line_total(line.quantity, line.unit_price, &line.customizations)
}

/// Derived order amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Totals computed from the raw lines, ignoring any stored amounts
pub fn recompute_totals(order: &Order, tax_rate_percent: Decimal) -> Totals {
    let subtotal: Decimal = order.lines.iter().map(line_total_of).sum();
    let tax = round_money(subtotal * tax_rate_percent / Decimal::ONE_HUNDRED);
    Totals {
        subtotal,
        tax,
        total: subtotal + tax,
    }
}

/// Rewrite every derived amount on the order from its lines
pub fn refresh_totals(order: &mut Order, tax_rate_percent: Decimal) {
    for line in &mut order.lines {
        line.line_total = line_total_of(line);
    }
    let totals = recompute_totals(order, tax_rate_percent);
    order.subtotal = totals.subtotal;
    order.tax = totals.tax;
    order.total = totals.total;
}
