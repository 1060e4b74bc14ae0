// =============================================================================
// MONEY HELPERS
// =============================================================================
// Two-digit rounding applied at computation boundaries, and the "$X.XX"
// formatting used in user-facing messages.
// =============================================================================

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to cents, half away from zero (half-up for the non-negative
/// amounts this service deals in).
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `$19.99`, always with two decimals
pub fn format_money(amount: Decimal) -> String {
    format!("${:.2}", round_money(amount))
}

/// unit price × quantity, rounded
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}
