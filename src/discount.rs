// =============================================================================
// DISCOUNT EVALUATOR
// =============================================================================
// Decides whether a discount code applies to an order subtotal and how much
// it takes off.
//
// Rules are checked in a fixed order and the first failure wins:
//   1. code and total present
//   2. code exists
//   3. code active
//   4. now within [valid_from, valid_to]
//   5. total >= min_order_amount
//   6. usage limit not reached
//   7. the discount amount is computable for this total
//
// Evaluation never writes. Redeeming a code (used_count + 1) is the order
// processor's job, inside the purchase unit of work.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::AppResult;
use crate::models::{DiscountCode, DiscountType, DiscountValidation};
use crate::money::{format_money, round_money};
use crate::store::{Store, UnitOfWork};

pub const MSG_REQUIRED: &str = "Discount code and order total are required";
pub const MSG_INVALID: &str = "Invalid discount code";
pub const MSG_INACTIVE: &str = "Discount code is inactive";
pub const MSG_EXPIRED: &str = "Discount code has expired";
pub const MSG_LIMIT_EXCEEDED: &str = "Discount code usage limit exceeded";
pub const MSG_VALID: &str = "Discount code is valid";
pub const MSG_OUT_OF_RANGE: &str = "Order total is out of range";

fn rejected(order_total: Decimal, message: impl Into<String>) -> DiscountValidation {
    DiscountValidation {
        is_valid: false,
        discount_type: None,
        discount_value: None,
        discount_amount: Decimal::ZERO,
        final_amount: order_total,
        message: message.into(),
    }
}

/// Amount a valid code takes off `order_total`, rounded to cents.
///
/// PERCENTAGE: total × value / 100, capped at `max_discount`.
/// FIXED_AMOUNT: value, capped at the total.
///
/// `None` when the percentage product does not fit in a `Decimal`.
pub fn discount_amount(discount: &DiscountCode, order_total: Decimal) -> Option<Decimal> {
    let amount = match discount.discount_type {
        DiscountType::Percentage => {
            let raw = round_money(
                order_total
                    .checked_mul(discount.discount_value)?
                    .checked_div(Decimal::ONE_HUNDRED)?,
            );
            match discount.max_discount {
                Some(cap) if raw > cap => cap,
                _ => raw,
            }
        }
        DiscountType::FixedAmount => discount.discount_value.min(order_total),
    };

    Some(round_money(amount.min(order_total).max(Decimal::ZERO)))
}

/// Pure rule evaluation over an already looked-up code.
///
/// `discount` is the lookup result for `code`; `None` means no such code.
pub fn evaluate(
    code: Option<&str>,
    order_total: Option<Decimal>,
    discount: Option<&DiscountCode>,
    now: DateTime<Utc>,
) -> DiscountValidation {
    let (code, order_total) = match (code.filter(|c| !c.trim().is_empty()), order_total) {
        (Some(code), Some(total)) => (code, total),
        (_, total) => return rejected(total.unwrap_or(Decimal::ZERO), MSG_REQUIRED),
    };

    let Some(discount) = discount.filter(|d| d.code == code) else {
        return rejected(order_total, MSG_INVALID);
    };

    if !discount.is_active {
        return rejected(order_total, MSG_INACTIVE);
    }

    if now < discount.valid_from || now > discount.valid_to {
        return rejected(order_total, MSG_EXPIRED);
    }

    if order_total < discount.min_order_amount {
        return rejected(
            order_total,
            format!(
                "Minimum order amount of {} required for this discount code",
                format_money(discount.min_order_amount)
            ),
        );
    }

    if discount.is_exhausted() {
        return rejected(order_total, MSG_LIMIT_EXCEEDED);
    }

    let Some(amount) = discount_amount(discount, order_total) else {
        return rejected(order_total, MSG_OUT_OF_RANGE);
    };

    DiscountValidation {
        is_valid: true,
        discount_type: Some(discount.discount_type),
        discount_value: Some(discount.discount_value),
        discount_amount: amount,
        final_amount: order_total - amount,
        message: MSG_VALID.to_string(),
    }
}

/// Looks the code up inside an open unit of work and evaluates it.
/// Returns the code record alongside the result so callers can redeem it.
pub async fn validate_in(
    uow: &mut dyn UnitOfWork,
    code: Option<&str>,
    order_total: Option<Decimal>,
    now: DateTime<Utc>,
) -> AppResult<(DiscountValidation, Option<DiscountCode>)> {
    let discount = match code.filter(|c| !c.trim().is_empty()) {
        Some(code) if order_total.is_some() => uow.find_discount_by_code(code).await?,
        _ => None,
    };

    let result = evaluate(code, order_total, discount.as_ref(), now);
    Ok((result, discount))
}

/// `validateDiscountCode`: side-effect-free preview
pub async fn validate_discount_code(
    store: &dyn Store,
    code: Option<&str>,
    order_total: Option<Decimal>,
    now: DateTime<Utc>,
) -> AppResult<DiscountValidation> {
    let mut uow = store.begin().await?;
    let (result, _) = validate_in(&mut *uow, code, order_total, now).await?;
    // read-only: dropping the unit of work discards nothing

    tracing::debug!(
        is_valid = result.is_valid,
        message = %result.message,
        "Discount code evaluated"
    );

    Ok(result)
}
