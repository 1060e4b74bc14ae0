// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures used throughout the service: persisted entities, status
// enums, and the API request/response bodies.
//
// All monetary values are rust_decimal::Decimal. Amounts are rounded to two
// places at computation boundaries (see money.rs), never carried as floats.
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// STATUS ENUMS
// =============================================================================
// Statuses are stored as TEXT columns holding the same SCREAMING_SNAKE_CASE
// names the API uses.

/// How a discount code reduces the order total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` percent of the order total, optionally capped
    Percentage,
    /// `discount_value` off, never more than the order total
    FixedAmount,
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERCENTAGE" => Ok(DiscountType::Percentage),
            "FIXED_AMOUNT" => Ok(DiscountType::FixedAmount),
            other => Err(format!("unknown discount type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    Active,
    Converted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        })
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Statuses that make an order line count as a verified purchase
    pub fn counts_as_purchase(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Processed,
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReturnStatus::Requested => "REQUESTED",
            ReturnStatus::Approved => "APPROVED",
            ReturnStatus::Rejected => "REJECTED",
            ReturnStatus::Processed => "PROCESSED",
        })
    }
}

impl ReturnStatus {
    /// REQUESTED -> APPROVED | REJECTED, APPROVED -> PROCESSED
    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        matches!(
            (self, next),
            (ReturnStatus::Requested, ReturnStatus::Approved)
                | (ReturnStatus::Requested, ReturnStatus::Rejected)
                | (ReturnStatus::Approved, ReturnStatus::Processed)
        )
    }

    pub fn is_decision(&self) -> bool {
        !matches!(self, ReturnStatus::Requested)
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

// -----------------------------------------------------------------------------
// BOOK
// -----------------------------------------------------------------------------
/// A catalog entry. Price and stock are authoritative only when read inside
/// the unit of work that acts on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    /// Unit price, never negative
    pub price: Decimal,
    /// Units on hand, never negative
    pub stock: i32,
}

// -----------------------------------------------------------------------------
// DISCOUNT CODE
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DiscountCode {
    pub id: Uuid,
    /// Unique, matched case-sensitively
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub min_order_amount: Decimal,
    /// Cap on the computed amount, PERCENTAGE codes only
    pub max_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DiscountCode {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if self.used_count >= limit)
    }
}

// -----------------------------------------------------------------------------
// SHOPPING CART
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: Uuid,
    pub owner: String,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
}

/// One line of a cart. Unique per (cart, book).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub book_id: Uuid,
    /// Always within 1..=99
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// ORDER
// -----------------------------------------------------------------------------
/// Created only by the purchase actions. `total_amount` is always
/// `original_amount - discount_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub owner: String,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub applied_discount_code: Option<Uuid>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub delivered_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
}

/// Order line with the unit price snapshotted at purchase time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub book_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

// -----------------------------------------------------------------------------
// RETURN REQUEST
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub id: Uuid,
    pub return_number: String,
    pub order_id: Uuid,
    pub book_id: Uuid,
    pub owner: String,
    pub quantity: i32,
    pub reason: String,
    pub status: ReturnStatus,
    pub request_date: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
    pub refund_amount: Decimal,
}

// -----------------------------------------------------------------------------
// REVIEW
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub book_id: Uuid,
    pub author: String,
    pub rating: i32,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub is_verified_purchase: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// API REQUEST/RESPONSE STRUCTURES
// =============================================================================
// Request fields are Option so that "missing" can be reported with the
// same 400 messages the storefront already shows, instead of a generic
// deserialization failure.

/// One requested line of a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub book_id: Uuid,
    pub quantity: i32,
}

/// Body of `purchaseBooks`
///
/// # Example JSON
/// ```json
/// {
///   "items": [{ "bookId": "…", "quantity": 2 }],
///   "discountCode": "SAVE10",
///   "shippingAddress": "1 Main St",
///   "billingAddress": "1 Main St",
///   "customerEmail": "reader@example.com",
///   "customerPhone": "+1 555 0100"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
    pub discount_code: Option<String>,
    #[serde(flatten)]
    pub contact: OrderContact,
}

/// Shipping and contact details copied onto the order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContact {
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

impl OrderContact {
    pub fn is_complete(&self) -> bool {
        [
            &self.shipping_address,
            &self.billing_address,
            &self.customer_email,
            &self.customer_phone,
        ]
        .iter()
        .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Body of `purchaseFromCart`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseFromCartRequest {
    pub discount_code: Option<String>,
    #[serde(flatten)]
    pub contact: OrderContact,
}

/// Plain confirmation returned by the string-valued actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDiscountRequest {
    pub discount_code: Option<String>,
    pub order_total: Option<Decimal>,
}

/// Outcome of discount validation. `final_amount` equals the order total
/// whenever `is_valid` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<Decimal>,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateTotalRequest {
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
    pub discount_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotal {
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub is_valid_discount: bool,
}

// -----------------------------------------------------------------------------
// CART REQUESTS / RESPONSES
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub book_id: Option<Uuid>,
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: Option<i32>,
}

/// Result shape shared by every cart operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_item_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_total: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<CartLine>,
}

impl CartResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            cart_item_count: None,
            cart_total: None,
            lines: Vec::new(),
        }
    }
}

/// A cart line priced at the current book price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub item_id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    pub author: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

// -----------------------------------------------------------------------------
// RETURNS / REVIEWS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReturnBody {
    pub order_id: Option<Uuid>,
    pub book_id: Option<Uuid>,
    pub quantity: Option<i32>,
    pub reason: Option<String>,
}

/// Rating arrives as a JSON number so that 4.5 is rejected with a 400
/// message rather than a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewRequest {
    pub book_id: Option<Uuid>,
    pub rating: Option<f64>,
    pub title: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanReviewResponse {
    pub can_review: bool,
}

// -----------------------------------------------------------------------------
// ADMIN REQUESTS
// -----------------------------------------------------------------------------

/// Body of the admin "create discount code" action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscountRequest {
    pub code: Option<String>,
    pub description: Option<String>,
    /// Kept as text so an unknown type gets a 400 with the allowed values
    pub discount_type: Option<String>,
    pub discount_value: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub min_order_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReturnStatusRequest {
    pub status: ReturnStatus,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Detailed readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

/// Individual dependency health checks. `redis` is None when no cache is
/// configured.
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub store: bool,
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
