// =============================================================================
// STORE MODULE
// =============================================================================
// The narrow persistence seam the business operations run against.
//
// Every operation opens one unit of work, performs its reads and writes
// through it, and commits. Dropping a unit of work without committing
// discards all of its writes, so an early `?` return is a rollback.
//
// Two implementations exist:
// - db::PgStore       (PostgreSQL via SQLx transactions)
// - memory::MemoryStore (in-process, used by tests and local runs)
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Book, Cart, CartItem, CartStatus, DiscountCode, Order, OrderItem, OrderStatus,
    ReturnRequest, ReturnStatus, Review,
};

/// Entry point: hands out units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;

    async fn health_check(&self) -> bool;
}

/// All reads and writes of one logical transaction.
///
/// Conditional writes (`decrement_stock`, `redeem_discount`,
/// `insert_active_cart`) report `false` instead of violating their guard;
/// callers turn that into the appropriate business error.
#[async_trait]
pub trait UnitOfWork: Send {
    // -------------------------------------------------------------------------
    // BOOKS
    // -------------------------------------------------------------------------
    async fn get_book(&mut self, id: Uuid) -> AppResult<Option<Book>>;

    /// Books with stock > 0, not in `exclude`, at most `limit`
    async fn list_in_stock_books(&mut self, exclude: &[Uuid], limit: i64) -> AppResult<Vec<Book>>;

    /// In-stock books in any of `categories`, not in `exclude`
    async fn list_in_stock_books_in_categories(
        &mut self,
        categories: &[Uuid],
        exclude: &[Uuid],
        limit: i64,
    ) -> AppResult<Vec<Book>>;

    async fn categories_of_books(&mut self, book_ids: &[Uuid]) -> AppResult<Vec<Uuid>>;

    /// stock -= quantity, only if the result stays >= 0
    async fn decrement_stock(&mut self, book_id: Uuid, quantity: i32) -> AppResult<bool>;

    // -------------------------------------------------------------------------
    // DISCOUNT CODES
    // -------------------------------------------------------------------------
    async fn find_discount_by_code(&mut self, code: &str) -> AppResult<Option<DiscountCode>>;

    async fn get_discount(&mut self, id: Uuid) -> AppResult<Option<DiscountCode>>;

    async fn list_discounts(&mut self) -> AppResult<Vec<DiscountCode>>;

    async fn insert_discount(&mut self, discount: &DiscountCode) -> AppResult<()>;

    async fn set_discount_active(&mut self, id: Uuid, active: bool) -> AppResult<()>;

    /// used_count += 1, only while under the usage limit
    async fn redeem_discount(&mut self, id: Uuid) -> AppResult<bool>;

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_active_cart(&mut self, owner: &str) -> AppResult<Option<Cart>>;

    /// Inserts unless the owner already has an ACTIVE cart
    async fn insert_active_cart(&mut self, cart: &Cart) -> AppResult<bool>;

    async fn set_cart_status(&mut self, cart_id: Uuid, status: CartStatus) -> AppResult<()>;

    async fn get_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>>;

    async fn get_cart(&mut self, id: Uuid) -> AppResult<Option<Cart>>;

    async fn find_cart_item(&mut self, cart_id: Uuid, book_id: Uuid) -> AppResult<Option<CartItem>>;

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>>;

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()>;

    async fn update_cart_item_quantity(&mut self, id: Uuid, quantity: i32) -> AppResult<()>;

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()>;

    async fn delete_cart_items(&mut self, cart_id: Uuid) -> AppResult<()>;

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &Order) -> AppResult<()>;

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()>;

    async fn get_order(&mut self, id: Uuid) -> AppResult<Option<Order>>;

    /// Newest first
    async fn list_orders_for_owner(&mut self, owner: &str) -> AppResult<Vec<Order>>;

    async fn find_order_item(&mut self, order_id: Uuid, book_id: Uuid) -> AppResult<Option<OrderItem>>;

    /// Distinct books across all of the owner's orders
    async fn purchased_book_ids(&mut self, owner: &str) -> AppResult<Vec<Uuid>>;

    async fn owner_has_order_line(
        &mut self,
        owner: &str,
        book_id: Uuid,
        statuses: &[OrderStatus],
    ) -> AppResult<bool>;

    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        delivered_date: Option<DateTime<Utc>>,
        cancelled_date: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    // -------------------------------------------------------------------------
    // RETURNS & REVIEWS
    // -------------------------------------------------------------------------
    async fn insert_return(&mut self, request: &ReturnRequest) -> AppResult<()>;

    async fn get_return(&mut self, id: Uuid) -> AppResult<Option<ReturnRequest>>;

    async fn update_return_status(
        &mut self,
        id: Uuid,
        status: ReturnStatus,
        processed_date: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    async fn find_review(&mut self, author: &str, book_id: Uuid) -> AppResult<Option<Review>>;

    async fn insert_review(&mut self, review: &Review) -> AppResult<()>;

    // -------------------------------------------------------------------------
    // COMPLETION
    // -------------------------------------------------------------------------
    async fn commit(self: Box<Self>) -> AppResult<()>;
}
