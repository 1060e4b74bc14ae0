// =============================================================================
// ORDER PROCESSOR
// =============================================================================
// Turns a list of requested lines (or the caller's active cart) into an
// order, inside a single unit of work:
//
//   validate every line  ->  price + discount  ->  order header
//   ->  order lines  ->  conditional stock decrements  ->  commit
//
// Every check that can fail runs before the first write. The stock
// decrement is still conditional: a concurrent purchase that took the last
// unit in between makes it report false, and the whole unit of work is
// dropped with the same "Insufficient stock" error a pre-check gives.
//
// Decrements run once per book in ascending book id, so two orders over
// the same books always take their row locks in the same order.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::auth::Principal;
use crate::cart::MSG_NO_ACTIVE_CART;
use crate::catalog::{book_not_found, insufficient_stock};
use crate::discount;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Book, CartStatus, CalculateTotalRequest, Order, OrderContact, OrderItem, OrderStatus,
    OrderTotal, PaymentStatus, PurchaseFromCartRequest, PurchaseItem, PurchaseRequest,
};
use crate::money::{format_money, line_total, round_money};
use crate::store::{Store, UnitOfWork};

const MSG_NO_ITEMS: &str = "No items provided for purchase";
const MSG_CART_CONTACT_REQUIRED: &str =
    "Shipping address, billing address, customer email, and customer phone are required";
const MSG_CART_EMPTY: &str = "Cart is empty";

/// `PREFIX-<unix millis>-<5 random hex chars>`, e.g. `ORD-1718000000000-3FA9C`
pub fn generate_reference(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..5].to_uppercase();
    format!("{}-{}-{}", prefix, now.timestamp_millis(), suffix)
}

/// A committed (or about to be committed) purchase
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Code text, present only when the discount was actually applied
    pub discount_code: Option<String>,
    pub message: String,
}

impl PlacedOrder {
    pub fn book_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|item| item.book_id).collect()
    }
}

fn failure_reason(err: &AppError) -> &'static str {
    match err {
        AppError::NotFound(_) => "not_found",
        AppError::BadRequest(msg) if msg.starts_with("Insufficient stock") => "insufficient_stock",
        AppError::BadRequest(_) => "validation",
        _ => "internal",
    }
}

fn record_placed(source: &'static str, placed: &PlacedOrder) {
    let cents = (placed.order.total_amount * Decimal::ONE_HUNDRED)
        .trunc()
        .to_u64()
        .unwrap_or(0);
    metrics::record_order_created(source, cents);
    if let Some(code) = &placed.discount_code {
        metrics::record_discount_redemption(code);
    }
}

// =============================================================================
// PURCHASE CORE
// =============================================================================

/// One decrement per distinct book, ascending by id
fn stock_decrements(lines: &[(Book, i32)]) -> Vec<(Uuid, i32)> {
    let mut per_book: BTreeMap<Uuid, i32> = BTreeMap::new();
    for (book, quantity) in lines {
        let total = per_book.entry(book.id).or_insert(0);
        *total = total.saturating_add(*quantity);
    }
    per_book.into_iter().collect()
}

/// The purchase algorithm against an open unit of work. Nothing is
/// committed here; the caller decides what else belongs to the same
/// transaction.
pub async fn place_order(
    uow: &mut dyn UnitOfWork,
    principal: &Principal,
    items: &[PurchaseItem],
    discount_code: Option<&str>,
    contact: &OrderContact,
    now: DateTime<Utc>,
) -> AppResult<PlacedOrder> {
    if items.is_empty() {
        return Err(AppError::bad_request(MSG_NO_ITEMS));
    }

    // Validation pass: no writes until every line checks out. Repeated
    // lines for one book are checked against its stock together.
    let mut lines: Vec<(Book, i32)> = Vec::with_capacity(items.len());
    let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
    let mut subtotal = Decimal::ZERO;
    for item in items {
        if item.quantity < 1 {
            return Err(AppError::bad_request("Quantity must be at least 1"));
        }
        let book = uow
            .get_book(item.book_id)
            .await?
            .ok_or_else(|| book_not_found(item.book_id))?;
        let total = requested.entry(book.id).or_insert(0);
        *total = total.saturating_add(item.quantity);
        if *total > book.stock {
            return Err(insufficient_stock(&book, *total));
        }
        subtotal += book.price * Decimal::from(item.quantity);
        lines.push((book, item.quantity));
    }
    let original_amount = round_money(subtotal);

    // An unusable code means full price, not a failed purchase.
    let mut discount_amount = Decimal::ZERO;
    let mut applied = None;
    if let Some(code) = discount_code.filter(|c| !c.trim().is_empty()) {
        let (validation, record) =
            discount::validate_in(uow, Some(code), Some(original_amount), now).await?;
        match record {
            Some(record) if validation.is_valid => {
                if uow.redeem_discount(record.id).await? {
                    discount_amount = validation.discount_amount;
                    applied = Some(record);
                } else {
                    tracing::info!(code, "Discount usage limit reached concurrently, charging full price");
                }
            }
            _ => {
                tracing::debug!(code, reason = %validation.message, "Discount not applied");
            }
        }
    }

    let order = Order {
        id: Uuid::new_v4(),
        order_number: generate_reference("ORD", now),
        owner: principal.user_id.clone(),
        order_date: now,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        original_amount,
        discount_amount,
        total_amount: original_amount - discount_amount,
        applied_discount_code: applied.as_ref().map(|d| d.id),
        shipping_address: contact.shipping_address.clone(),
        billing_address: contact.billing_address.clone(),
        customer_email: contact.customer_email.clone(),
        customer_phone: contact.customer_phone.clone(),
        delivered_date: None,
        cancelled_date: None,
    };
    uow.insert_order(&order).await?;

    let mut order_items = Vec::with_capacity(lines.len());
    for (book, quantity) in &lines {
        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            book_id: book.id,
            quantity: *quantity,
            unit_price: book.price,
            total_price: line_total(book.price, *quantity),
        };
        uow.insert_order_item(&item).await?;
        order_items.push(item);
    }

    for (book_id, quantity) in stock_decrements(&lines) {
        if !uow.decrement_stock(book_id, quantity).await? {
            let current = match uow.get_book(book_id).await? {
                Some(book) => book,
                None => return Err(book_not_found(book_id)),
            };
            return Err(insufficient_stock(&current, quantity));
        }
    }

    let mut message = format!(
        "Order {} created successfully with total amount {}",
        order.order_number,
        format_money(order.total_amount)
    );
    if let Some(code) = &applied {
        message.push_str(&format!(
            " with {} discount applied (saved {})",
            code.code,
            format_money(discount_amount)
        ));
    }

    Ok(PlacedOrder {
        order,
        items: order_items,
        discount_code: applied.map(|d| d.code),
        message,
    })
}

// =============================================================================
// PURCHASE ACTIONS
// =============================================================================

/// `purchaseBooks`
pub async fn purchase_books(
    store: &dyn Store,
    principal: &Principal,
    request: &PurchaseRequest,
    now: DateTime<Utc>,
) -> AppResult<PlacedOrder> {
    let result = async {
        let mut uow = store.begin().await?;
        let placed = place_order(
            &mut *uow,
            principal,
            &request.items,
            request.discount_code.as_deref(),
            &request.contact,
            now,
        )
        .await?;
        uow.commit().await?;
        Ok::<_, AppError>(placed)
    }
    .await;

    match &result {
        Ok(placed) => {
            record_placed("direct", placed);
            tracing::info!(
                order_number = %placed.order.order_number,
                user = %principal.user_id,
                total = %placed.order.total_amount,
                lines = placed.items.len(),
                "Order placed"
            );
        }
        Err(e) => metrics::record_purchase_failure(failure_reason(e)),
    }
    result
}

/// `purchaseFromCart`: the purchase, the cart emptying and the CONVERTED
/// mark all commit together.
pub async fn purchase_from_cart(
    store: &dyn Store,
    principal: &Principal,
    request: &PurchaseFromCartRequest,
    now: DateTime<Utc>,
) -> AppResult<PlacedOrder> {
    if !request.contact.is_complete() {
        return Err(AppError::bad_request(MSG_CART_CONTACT_REQUIRED));
    }

    let result = async {
        let mut uow = store.begin().await?;
        let cart = uow
            .find_active_cart(&principal.user_id)
            .await?
            .ok_or_else(|| AppError::not_found(MSG_NO_ACTIVE_CART))?;

        let items: Vec<PurchaseItem> = uow
            .list_cart_items(cart.id)
            .await?
            .into_iter()
            .map(|item| PurchaseItem {
                book_id: item.book_id,
                quantity: item.quantity,
            })
            .collect();
        if items.is_empty() {
            return Err(AppError::bad_request(MSG_CART_EMPTY));
        }

        let mut placed = place_order(
            &mut *uow,
            principal,
            &items,
            request.discount_code.as_deref(),
            &request.contact,
            now,
        )
        .await?;

        uow.delete_cart_items(cart.id).await?;
        uow.set_cart_status(cart.id, CartStatus::Converted).await?;
        uow.commit().await?;

        placed.message = placed
            .message
            .replacen("created successfully", "created successfully from cart", 1);
        Ok::<_, AppError>(placed)
    }
    .await;

    match &result {
        Ok(placed) => {
            record_placed("cart", placed);
            tracing::info!(
                order_number = %placed.order.order_number,
                user = %principal.user_id,
                total = %placed.order.total_amount,
                "Cart converted to order"
            );
        }
        Err(e) => metrics::record_purchase_failure(failure_reason(e)),
    }
    result
}

// =============================================================================
// QUERIES
// =============================================================================

/// `calculateOrderTotal`: a preview. Unknown books and non-positive
/// quantities are left out of the total rather than failing.
pub async fn calculate_order_total(
    store: &dyn Store,
    request: &CalculateTotalRequest,
    now: DateTime<Utc>,
) -> AppResult<OrderTotal> {
    let mut uow = store.begin().await?;

    let mut subtotal = Decimal::ZERO;
    for item in request.items.iter().filter(|i| i.quantity > 0) {
        if let Some(book) = uow.get_book(item.book_id).await? {
            subtotal += book.price * Decimal::from(item.quantity);
        }
    }
    let original_amount = round_money(subtotal);

    let mut total = OrderTotal {
        original_amount,
        discount_amount: Decimal::ZERO,
        total_amount: original_amount,
        is_valid_discount: false,
    };

    if let Some(code) = request.discount_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let (validation, _) =
            discount::validate_in(&mut *uow, Some(code), Some(original_amount), now).await?;
        if validation.is_valid {
            total.discount_amount = validation.discount_amount;
            total.total_amount = validation.final_amount;
            total.is_valid_discount = true;
        }
    }

    Ok(total)
}

/// `getOrderHistory`: the caller's own orders, newest first
pub async fn order_history(store: &dyn Store, principal: &Principal) -> AppResult<Vec<Order>> {
    let mut uow = store.begin().await?;
    uow.list_orders_for_owner(&principal.user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart;
    use crate::memory::MemoryStore;
    use crate::models::{AddToCartRequest, DiscountCode, DiscountType};
    use chrono::Duration;

    fn book(title: &str, cents: i64, stock: i32) -> Book {
        Book {
            id: Uuid::new_v4(),
            title: title.into(),
            author: "Author".into(),
            price: Decimal::new(cents, 2),
            stock,
        }
    }

    fn save10(now: DateTime<Utc>) -> DiscountCode {
        DiscountCode {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::new(10, 0),
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            min_order_amount: Decimal::new(25, 0),
            max_discount: Some(Decimal::new(50, 0)),
            usage_limit: None,
            used_count: 0,
            is_active: true,
            created_at: now,
        }
    }

    async fn store_with(books: &[&Book]) -> MemoryStore {
        let store = MemoryStore::new();
        for b in books {
            store.put_book((*b).clone(), vec![]).await;
        }
        store
    }

    fn buy(book: &Book, quantity: i32, code: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            items: vec![PurchaseItem {
                book_id: book.id,
                quantity,
            }],
            discount_code: code.map(String::from),
            contact: OrderContact::default(),
        }
    }

    fn full_contact() -> OrderContact {
        OrderContact {
            shipping_address: Some("1 Main St".into()),
            billing_address: Some("1 Main St".into()),
            customer_email: Some("reader@example.com".into()),
            customer_phone: Some("+1 555 0100".into()),
        }
    }

    #[test]
    fn test_reference_format() {
        let now = Utc::now();
        let reference = generate_reference("ORD", now);
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 5);
        assert_ne!(reference, generate_reference("ORD", now));
    }

    #[tokio::test]
    async fn test_single_book_purchase() {
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");

        let placed = purchase_books(&store, &alice, &buy(&dune, 1, None), Utc::now())
            .await
            .unwrap();

        assert!(placed.message.contains("$19.99"));
        assert!(placed.message.starts_with(&format!("Order {}", placed.order.order_number)));
        assert_eq!(placed.order.original_amount, Decimal::new(1999, 2));
        assert_eq!(placed.order.discount_amount, Decimal::ZERO);
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
        assert_eq!(store.book(dune.id).await.unwrap().stock, 4);
        assert_eq!(store.order_item_count().await, 1);
    }

    #[tokio::test]
    async fn test_over_stock_purchase_writes_nothing() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let code = save10(now);
        store.put_discount(code.clone()).await;

        let err = purchase_books(
            &store,
            &Principal::customer("alice"),
            &buy(&dune, 6, Some("SAVE10")),
            now,
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Insufficient stock for book \"Dune\". Available: 5, Requested: 6"
        );
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.book(dune.id).await.unwrap().stock, 5);
        assert_eq!(store.discount(code.id).await.unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn test_later_line_failure_rolls_back_earlier_lines() {
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let request = PurchaseRequest {
            items: vec![
                PurchaseItem { book_id: dune.id, quantity: 1 },
                PurchaseItem { book_id: Uuid::new_v4(), quantity: 1 },
            ],
            ..Default::default()
        };

        let result = purchase_books(&store, &Principal::customer("alice"), &request, Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.book(dune.id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_empty_and_non_positive_lines_rejected() {
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");

        let err = purchase_books(&store, &alice, &PurchaseRequest::default(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), MSG_NO_ITEMS);

        let result = purchase_books(&store, &alice, &buy(&dune, 0, None), Utc::now()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_discount_applied_and_redeemed_once() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let code = save10(now);
        store.put_discount(code.clone()).await;

        let placed = purchase_books(
            &store,
            &Principal::customer("alice"),
            &buy(&dune, 2, Some("SAVE10")),
            now,
        )
        .await
        .unwrap();

        // 39.98 * 10% = 3.998 -> 4.00
        assert_eq!(placed.order.original_amount, Decimal::new(3998, 2));
        assert_eq!(placed.order.discount_amount, Decimal::new(400, 2));
        assert_eq!(placed.order.total_amount, Decimal::new(3598, 2));
        assert_eq!(placed.order.applied_discount_code, Some(code.id));
        assert!(placed
            .message
            .ends_with("with total amount $35.98 with SAVE10 discount applied (saved $4.00)"));
        assert_eq!(store.discount(code.id).await.unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn test_unusable_code_means_full_price() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let mut exhausted = save10(now);
        exhausted.min_order_amount = Decimal::ZERO;
        exhausted.usage_limit = Some(1);
        exhausted.used_count = 1;
        store.put_discount(exhausted.clone()).await;
        let alice = Principal::customer("alice");

        for code in ["NOPE", "SAVE10"] {
            let placed = purchase_books(&store, &alice, &buy(&dune, 1, Some(code)), now)
                .await
                .unwrap();
            assert_eq!(placed.order.discount_amount, Decimal::ZERO);
            assert_eq!(placed.order.total_amount, Decimal::new(1999, 2));
            assert!(placed.discount_code.is_none());
        }
        assert_eq!(store.discount(exhausted.id).await.unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn test_last_unit_race_has_one_winner() {
        let last = book("Dune", 1999, 1);
        let store = store_with(&[&last]).await;

        let mut handles = Vec::new();
        for user in ["alice", "bob"] {
            let store = store.clone();
            let request = buy(&last, 1, None);
            handles.push(tokio::spawn(async move {
                purchase_books(&store, &Principal::customer(user), &request, Utc::now()).await
            }));
        }

        let mut wins = 0;
        let mut losses = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => losses.push(e.to_string()),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(losses.len(), 1);
        assert!(losses[0].starts_with("Insufficient stock for book \"Dune\""));
        assert_eq!(store.book(last.id).await.unwrap().stock, 0);
        assert_eq!(store.order_count().await, 1);
    }

    #[test]
    fn test_stock_decrements_merge_and_sort_by_book() {
        let a = book("A", 100, 5);
        let b = book("B", 100, 5);
        let (low, high) = if a.id < b.id { (&a, &b) } else { (&b, &a) };

        let lines = vec![(high.clone(), 1), (low.clone(), 2), (high.clone(), 3)];
        assert_eq!(stock_decrements(&lines), vec![(low.id, 2), (high.id, 4)]);

        let reversed = vec![(low.clone(), 2), (high.clone(), 4)];
        assert_eq!(stock_decrements(&reversed), stock_decrements(&lines));
    }

    #[tokio::test]
    async fn test_repeated_lines_share_one_stock_check() {
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");
        let line = PurchaseItem { book_id: dune.id, quantity: 3 };

        let over = PurchaseRequest {
            items: vec![line.clone(), line.clone()],
            ..Default::default()
        };
        let err = purchase_books(&store, &alice, &over, Utc::now()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for book \"Dune\". Available: 5, Requested: 6"
        );
        assert_eq!(store.order_count().await, 0);

        let fits = PurchaseRequest {
            items: vec![line.clone(), PurchaseItem { book_id: dune.id, quantity: 2 }],
            ..Default::default()
        };
        let placed = purchase_books(&store, &alice, &fits, Utc::now()).await.unwrap();
        assert_eq!(placed.items.len(), 2);
        assert_eq!(store.book(dune.id).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_crossed_multi_book_orders_both_complete() {
        let dune = book("Dune", 1000, 5);
        let spqr = book("SPQR", 2000, 5);
        let store = store_with(&[&dune, &spqr]).await;

        let mut handles = Vec::new();
        for (user, first, second) in [("alice", &dune, &spqr), ("bob", &spqr, &dune)] {
            let store = store.clone();
            let request = PurchaseRequest {
                items: vec![
                    PurchaseItem { book_id: first.id, quantity: 1 },
                    PurchaseItem { book_id: second.id, quantity: 1 },
                ],
                ..Default::default()
            };
            handles.push(tokio::spawn(async move {
                purchase_books(&store, &Principal::customer(user), &request, Utc::now()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(store.book(dune.id).await.unwrap().stock, 3);
        assert_eq!(store.book(spqr.id).await.unwrap().stock, 3);
        assert_eq!(store.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_last_redemption_race_has_one_discounted_order() {
        let now = Utc::now();
        let dune = book("Dune", 3000, 10);
        let store = store_with(&[&dune]).await;
        let mut code = save10(now);
        code.usage_limit = Some(3);
        code.used_count = 2;
        store.put_discount(code.clone()).await;

        let mut handles = Vec::new();
        for user in ["alice", "bob"] {
            let store = store.clone();
            let request = buy(&dune, 1, Some("SAVE10"));
            handles.push(tokio::spawn(async move {
                purchase_books(&store, &Principal::customer(user), &request, now).await
            }));
        }

        let mut discounted = 0;
        let mut full_price = 0;
        for handle in handles {
            let placed = handle.await.unwrap().unwrap();
            if placed.discount_code.is_some() {
                assert_eq!(placed.order.total_amount, Decimal::new(2700, 2));
                assert_eq!(placed.order.applied_discount_code, Some(code.id));
                discounted += 1;
            } else {
                assert_eq!(placed.order.discount_amount, Decimal::ZERO);
                assert_eq!(placed.order.total_amount, Decimal::new(3000, 2));
                assert_eq!(placed.order.applied_discount_code, None);
                full_price += 1;
            }
        }

        assert_eq!((discounted, full_price), (1, 1));
        assert_eq!(store.discount(code.id).await.unwrap().used_count, 3);
        assert_eq!(store.book(dune.id).await.unwrap().stock, 8);
    }

    #[tokio::test]
    async fn test_purchase_from_cart_converts_cart() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let spqr = book("SPQR", 2450, 3);
        let store = store_with(&[&dune, &spqr]).await;
        let alice = Principal::customer("alice");

        for (b, q) in [(&dune, 2), (&spqr, 1)] {
            let add = AddToCartRequest { book_id: Some(b.id), quantity: Some(q) };
            cart::add_to_cart(&store, &alice, &add, now).await.unwrap();
        }

        let request = PurchaseFromCartRequest {
            discount_code: None,
            contact: full_contact(),
        };
        let placed = purchase_from_cart(&store, &alice, &request, now).await.unwrap();

        assert!(placed.message.contains("created successfully from cart"));
        assert_eq!(placed.order.total_amount, Decimal::new(6448, 2));
        assert_eq!(placed.order.customer_email.as_deref(), Some("reader@example.com"));
        assert_eq!(store.book(dune.id).await.unwrap().stock, 3);
        assert_eq!(store.book(spqr.id).await.unwrap().stock, 2);

        // the converted cart is gone; the next read starts empty
        let summary = cart::get_cart_summary(&store, &alice).await.unwrap();
        assert_eq!(summary.message, cart::MSG_EMPTY);
        let again = purchase_from_cart(&store, &alice, &request, now).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_purchase_from_cart_preconditions() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");

        let incomplete = PurchaseFromCartRequest::default();
        let err = purchase_from_cart(&store, &alice, &incomplete, now).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_CART_CONTACT_REQUIRED);

        let request = PurchaseFromCartRequest {
            discount_code: None,
            contact: full_contact(),
        };
        let add = AddToCartRequest { book_id: Some(dune.id), quantity: Some(1) };
        cart::add_to_cart(&store, &alice, &add, now).await.unwrap();
        cart::clear_cart(&store, &alice).await.unwrap();

        let err = purchase_from_cart(&store, &alice, &request, now).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_CART_EMPTY);
    }

    #[tokio::test]
    async fn test_failed_cart_purchase_keeps_cart() {
        let now = Utc::now();
        let mut dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");
        let add = AddToCartRequest { book_id: Some(dune.id), quantity: Some(4) };
        cart::add_to_cart(&store, &alice, &add, now).await.unwrap();

        dune.stock = 2;
        store.put_book(dune.clone(), vec![]).await;

        let request = PurchaseFromCartRequest {
            discount_code: None,
            contact: full_contact(),
        };
        assert!(purchase_from_cart(&store, &alice, &request, now).await.is_err());

        let summary = cart::get_cart_summary(&store, &alice).await.unwrap();
        assert_eq!(summary.cart_item_count, Some(4));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_calculate_order_total() {
        let now = Utc::now();
        let dune = book("Dune", 1999, 5);
        let store = store_with(&[&dune]).await;
        let code = save10(now);
        store.put_discount(code.clone()).await;

        let request = CalculateTotalRequest {
            items: vec![
                PurchaseItem { book_id: dune.id, quantity: 2 },
                PurchaseItem { book_id: Uuid::new_v4(), quantity: 3 },
            ],
            discount_code: Some("SAVE10".into()),
        };
        let total = calculate_order_total(&store, &request, now).await.unwrap();
        assert_eq!(total.original_amount, Decimal::new(3998, 2));
        assert_eq!(total.discount_amount, Decimal::new(400, 2));
        assert_eq!(total.total_amount, total.original_amount - total.discount_amount);
        assert!(total.is_valid_discount);

        let empty = calculate_order_total(&store, &CalculateTotalRequest::default(), now)
            .await
            .unwrap();
        assert_eq!(empty.total_amount, Decimal::ZERO);
        assert!(!empty.is_valid_discount);

        // preview never redeems
        assert_eq!(store.discount(code.id).await.unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn test_order_history_is_private_and_newest_first() {
        let dune = book("Dune", 1999, 10);
        let store = store_with(&[&dune]).await;
        let alice = Principal::customer("alice");
        let earlier = Utc::now() - Duration::hours(2);

        let first = purchase_books(&store, &alice, &buy(&dune, 1, None), earlier).await.unwrap();
        let second = purchase_books(&store, &alice, &buy(&dune, 1, None), Utc::now()).await.unwrap();
        purchase_books(&store, &Principal::customer("bob"), &buy(&dune, 1, None), Utc::now())
            .await
            .unwrap();

        let history = order_history(&store, &alice).await.unwrap();
        let numbers: Vec<&str> = history.iter().map(|o| o.order_number.as_str()).collect();
        assert_eq!(
            numbers,
            vec![second.order.order_number.as_str(), first.order.order_number.as_str()]
        );
    }
}
