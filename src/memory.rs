// =============================================================================
// IN-MEMORY STORE
// =============================================================================
// A Store backed by plain collections behind one async mutex.
//
// A unit of work holds the mutex for its whole lifetime and writes to a
// private copy of the data; `commit` swaps the copy in. Units of work are
// therefore fully serialized, which gives the same guarantees the Postgres
// store gets from row locks and conditional updates.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Book, Cart, CartItem, CartStatus, DiscountCode, Order, OrderItem, OrderStatus,
    ReturnRequest, ReturnStatus, Review,
};
use crate::store::{Store, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Dataset {
    books: HashMap<Uuid, Book>,
    /// book id -> category ids
    book_categories: HashMap<Uuid, Vec<Uuid>>,
    discounts: HashMap<Uuid, DiscountCode>,
    carts: HashMap<Uuid, Cart>,
    cart_items: HashMap<Uuid, CartItem>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
    returns: HashMap<Uuid, ReturnRequest>,
    reviews: HashMap<Uuid, Review>,
}

impl Dataset {
    /// Deterministic listing order for catalog queries
    fn sorted_books<'a>(&'a self, filter: impl Fn(&Book) -> bool) -> Vec<&'a Book> {
        let mut books: Vec<&Book> = self.books.values().filter(|b| filter(b)).collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        books
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog entry. Catalog management lives outside
    /// this service; this is how seed data and tests populate it.
    pub async fn put_book(&self, book: Book, categories: Vec<Uuid>) {
        let mut data = self.data.lock().await;
        data.book_categories.insert(book.id, categories);
        data.books.insert(book.id, book);
    }

    pub async fn put_discount(&self, discount: DiscountCode) {
        self.data.lock().await.discounts.insert(discount.id, discount);
    }

    /// Snapshot read of a book outside any unit of work
    #[cfg(test)]
    pub async fn book(&self, id: Uuid) -> Option<Book> {
        self.data.lock().await.books.get(&id).cloned()
    }

    #[cfg(test)]
    pub async fn discount(&self, id: Uuid) -> Option<DiscountCode> {
        self.data.lock().await.discounts.get(&id).cloned()
    }

    #[cfg(test)]
    pub async fn order_count(&self) -> usize {
        self.data.lock().await.orders.len()
    }

    #[cfg(test)]
    pub async fn order_item_count(&self) -> usize {
        self.data.lock().await.order_items.len()
    }

    /// Overwrites an order as an administrator or a test fixture would
    #[cfg(test)]
    pub async fn put_order(&self, order: Order) {
        self.data.lock().await.orders.insert(order.id, order);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let guard = self.data.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Dataset>,
    working: Dataset,
}

fn missing(entity: &str, id: Uuid) -> AppError {
    AppError::Internal(format!("{} {} vanished inside a unit of work", entity, id))
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    // -------------------------------------------------------------------------
    // BOOKS
    // -------------------------------------------------------------------------
    async fn get_book(&mut self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&id).cloned())
    }

    async fn list_in_stock_books(&mut self, exclude: &[Uuid], limit: i64) -> AppResult<Vec<Book>> {
        Ok(self
            .working
            .sorted_books(|b| b.stock > 0 && !exclude.contains(&b.id))
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_in_stock_books_in_categories(
        &mut self,
        categories: &[Uuid],
        exclude: &[Uuid],
        limit: i64,
    ) -> AppResult<Vec<Book>> {
        let data = &self.working;
        Ok(data
            .sorted_books(|b| {
                b.stock > 0
                    && !exclude.contains(&b.id)
                    && data
                        .book_categories
                        .get(&b.id)
                        .is_some_and(|cats| cats.iter().any(|c| categories.contains(c)))
            })
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn categories_of_books(&mut self, book_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
        let categories: BTreeSet<Uuid> = book_ids
            .iter()
            .filter_map(|id| self.working.book_categories.get(id))
            .flatten()
            .copied()
            .collect();
        Ok(categories.into_iter().collect())
    }

    async fn decrement_stock(&mut self, book_id: Uuid, quantity: i32) -> AppResult<bool> {
        match self.working.books.get_mut(&book_id) {
            Some(book) if book.stock >= quantity => {
                book.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // -------------------------------------------------------------------------
    // DISCOUNT CODES
    // -------------------------------------------------------------------------
    async fn find_discount_by_code(&mut self, code: &str) -> AppResult<Option<DiscountCode>> {
        Ok(self
            .working
            .discounts
            .values()
            .find(|d| d.code == code)
            .cloned())
    }

    async fn get_discount(&mut self, id: Uuid) -> AppResult<Option<DiscountCode>> {
        Ok(self.working.discounts.get(&id).cloned())
    }

    async fn list_discounts(&mut self) -> AppResult<Vec<DiscountCode>> {
        let mut discounts: Vec<DiscountCode> = self.working.discounts.values().cloned().collect();
        discounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(discounts)
    }

    async fn insert_discount(&mut self, discount: &DiscountCode) -> AppResult<()> {
        if self.working.discounts.values().any(|d| d.code == discount.code) {
            return Err(AppError::bad_request(format!(
                "Discount code '{}' already exists",
                discount.code
            )));
        }
        self.working.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn set_discount_active(&mut self, id: Uuid, active: bool) -> AppResult<()> {
        let discount = self
            .working
            .discounts
            .get_mut(&id)
            .ok_or_else(|| missing("discount", id))?;
        discount.is_active = active;
        Ok(())
    }

    async fn redeem_discount(&mut self, id: Uuid) -> AppResult<bool> {
        match self.working.discounts.get_mut(&id) {
            Some(discount) if !discount.is_exhausted() => {
                discount.used_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_active_cart(&mut self, owner: &str) -> AppResult<Option<Cart>> {
        Ok(self
            .working
            .carts
            .values()
            .find(|c| c.owner == owner && c.status == CartStatus::Active)
            .cloned())
    }

    async fn insert_active_cart(&mut self, cart: &Cart) -> AppResult<bool> {
        if self.find_active_cart(&cart.owner).await?.is_some() {
            return Ok(false);
        }
        self.working.carts.insert(cart.id, cart.clone());
        Ok(true)
    }

    async fn set_cart_status(&mut self, cart_id: Uuid, status: CartStatus) -> AppResult<()> {
        let cart = self
            .working
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| missing("cart", cart_id))?;
        cart.status = status;
        Ok(())
    }

    async fn get_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>> {
        Ok(self.working.cart_items.get(&id).cloned())
    }

    async fn get_cart(&mut self, id: Uuid) -> AppResult<Option<Cart>> {
        Ok(self.working.carts.get(&id).cloned())
    }

    async fn find_cart_item(&mut self, cart_id: Uuid, book_id: Uuid) -> AppResult<Option<CartItem>> {
        Ok(self
            .working
            .cart_items
            .values()
            .find(|i| i.cart_id == cart_id && i.book_id == book_id)
            .cloned())
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>> {
        let mut items: Vec<CartItem> = self
            .working
            .cart_items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        self.working.cart_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_cart_item_quantity(&mut self, id: Uuid, quantity: i32) -> AppResult<()> {
        let item = self
            .working
            .cart_items
            .get_mut(&id)
            .ok_or_else(|| missing("cart item", id))?;
        item.quantity = quantity;
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working.cart_items.remove(&id);
        Ok(())
    }

    async fn delete_cart_items(&mut self, cart_id: Uuid) -> AppResult<()> {
        self.working.cart_items.retain(|_, i| i.cart_id != cart_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        if self
            .working
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(AppError::Internal(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()> {
        self.working.order_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn list_orders_for_owner(&mut self, owner: &str) -> AppResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date));
        Ok(orders)
    }

    async fn find_order_item(&mut self, order_id: Uuid, book_id: Uuid) -> AppResult<Option<OrderItem>> {
        Ok(self
            .working
            .order_items
            .values()
            .find(|i| i.order_id == order_id && i.book_id == book_id)
            .cloned())
    }

    async fn purchased_book_ids(&mut self, owner: &str) -> AppResult<Vec<Uuid>> {
        let data = &self.working;
        let ids: BTreeSet<Uuid> = data
            .order_items
            .values()
            .filter(|i| data.orders.get(&i.order_id).is_some_and(|o| o.owner == owner))
            .map(|i| i.book_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn owner_has_order_line(
        &mut self,
        owner: &str,
        book_id: Uuid,
        statuses: &[OrderStatus],
    ) -> AppResult<bool> {
        let data = &self.working;
        Ok(data.order_items.values().any(|i| {
            i.book_id == book_id
                && data
                    .orders
                    .get(&i.order_id)
                    .is_some_and(|o| o.owner == owner && statuses.contains(&o.status))
        }))
    }

    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        delivered_date: Option<DateTime<Utc>>,
        cancelled_date: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&id)
            .ok_or_else(|| missing("order", id))?;
        order.status = status;
        if delivered_date.is_some() {
            order.delivered_date = delivered_date;
        }
        if cancelled_date.is_some() {
            order.cancelled_date = cancelled_date;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // RETURNS & REVIEWS
    // -------------------------------------------------------------------------
    async fn insert_return(&mut self, request: &ReturnRequest) -> AppResult<()> {
        self.working.returns.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_return(&mut self, id: Uuid) -> AppResult<Option<ReturnRequest>> {
        Ok(self.working.returns.get(&id).cloned())
    }

    async fn update_return_status(
        &mut self,
        id: Uuid,
        status: ReturnStatus,
        processed_date: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let request = self
            .working
            .returns
            .get_mut(&id)
            .ok_or_else(|| missing("return request", id))?;
        request.status = status;
        if processed_date.is_some() {
            request.processed_date = processed_date;
        }
        Ok(())
    }

    async fn find_review(&mut self, author: &str, book_id: Uuid) -> AppResult<Option<Review>> {
        Ok(self
            .working
            .reviews
            .values()
            .find(|r| r.author == author && r.book_id == book_id)
            .cloned())
    }

    async fn insert_review(&mut self, review: &Review) -> AppResult<()> {
        self.working.reviews.insert(review.id, review.clone());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // COMPLETION
    // -------------------------------------------------------------------------
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
