// =============================================================================
// CART AGGREGATOR
// =============================================================================
// Per-user shopping cart: lazily created ACTIVE cart, one line per book,
// totals recomputed from current book prices on every read.
//
// Ownership is checked through the owning cart. Items that don't exist and
// items owned by someone else both answer 404 "Cart item not found".
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::auth::Principal;
use crate::catalog::{book_not_found, insufficient_stock};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    AddToCartRequest, Cart, CartItem, CartLine, CartResponse, CartStatus, UpdateCartItemRequest,
};
use crate::money::{format_money, line_total, round_money};
use crate::store::{Store, UnitOfWork};

pub const MAX_QUANTITY_PER_ITEM: i32 = 99;

const MSG_QUANTITY_RANGE: &str = "Quantity must be between 1 and 99";
const MSG_ITEM_NOT_FOUND: &str = "Cart item not found";
pub const MSG_NO_ACTIVE_CART: &str = "Active cart not found";
pub const MSG_EMPTY: &str = "Your cart is empty.";

/// Item count and total of a cart at the current book prices
#[derive(Debug, Clone, PartialEq)]
pub struct CartTotals {
    /// Sum of quantities
    pub item_count: i64,
    /// Σ price × quantity, rounded after summation
    pub total: Decimal,
    pub lines: Vec<CartLine>,
}

impl CartTotals {
    fn into_response(self, message: impl Into<String>) -> CartResponse {
        CartResponse {
            success: true,
            message: message.into(),
            cart_item_count: Some(self.item_count),
            cart_total: Some(self.total),
            lines: self.lines,
        }
    }
}

fn check_quantity(quantity: i32) -> AppResult<()> {
    if !(1..=MAX_QUANTITY_PER_ITEM).contains(&quantity) {
        return Err(AppError::bad_request(MSG_QUANTITY_RANGE));
    }
    Ok(())
}

// =============================================================================
// UNIT-OF-WORK LEVEL OPERATIONS
// =============================================================================

/// The owner's ACTIVE cart, created if missing. The store refuses a second
/// ACTIVE cart per owner, so a lost creation race just re-reads the winner.
pub async fn get_or_create_active_cart(
    uow: &mut dyn UnitOfWork,
    owner: &str,
    now: DateTime<Utc>,
) -> AppResult<Cart> {
    if let Some(cart) = uow.find_active_cart(owner).await? {
        return Ok(cart);
    }

    let cart = Cart {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        status: CartStatus::Active,
        created_at: now,
    };

    if uow.insert_active_cart(&cart).await? {
        tracing::debug!(cart_id = %cart.id, owner, "Created active cart");
        return Ok(cart);
    }

    uow.find_active_cart(owner)
        .await?
        .ok_or_else(|| AppError::Internal("active cart disappeared during creation".into()))
}

/// `computeTotals`: lines whose book no longer exists are skipped
pub async fn compute_totals(uow: &mut dyn UnitOfWork, cart_id: Uuid) -> AppResult<CartTotals> {
    let items = uow.list_cart_items(cart_id).await?;

    let mut item_count = 0i64;
    let mut total = Decimal::ZERO;
    let mut lines = Vec::with_capacity(items.len());

    for item in items {
        let Some(book) = uow.get_book(item.book_id).await? else {
            continue;
        };
        item_count += i64::from(item.quantity);
        total += book.price * Decimal::from(item.quantity);
        lines.push(CartLine {
            item_id: item.id,
            book_id: book.id,
            title: book.title,
            author: book.author,
            quantity: item.quantity,
            unit_price: book.price,
            line_total: line_total(book.price, item.quantity),
        });
    }

    Ok(CartTotals {
        item_count,
        total: round_money(total),
        lines,
    })
}

/// Loads a cart item only if it sits in one of `owner`'s carts
async fn owned_item(uow: &mut dyn UnitOfWork, owner: &str, item_id: Uuid) -> AppResult<CartItem> {
    let item = uow
        .get_cart_item(item_id)
        .await?
        .ok_or_else(|| AppError::not_found(MSG_ITEM_NOT_FOUND))?;

    match uow.get_cart(item.cart_id).await? {
        Some(cart) if cart.owner == owner => Ok(item),
        _ => Err(AppError::not_found(MSG_ITEM_NOT_FOUND)),
    }
}

// =============================================================================
// CART ACTIONS
// =============================================================================

/// `addToCart(bookId, quantity)`
pub async fn add_to_cart(
    store: &dyn Store,
    principal: &Principal,
    request: &AddToCartRequest,
    now: DateTime<Utc>,
) -> AppResult<CartResponse> {
    let (Some(book_id), Some(quantity)) = (request.book_id, request.quantity) else {
        return Err(AppError::bad_request("Book ID and quantity are required"));
    };
    check_quantity(quantity)?;

    let mut uow = store.begin().await?;

    let book = uow.get_book(book_id).await?.ok_or_else(|| book_not_found(book_id))?;
    if book.stock < quantity {
        return Err(insufficient_stock(&book, quantity));
    }

    let cart = get_or_create_active_cart(&mut *uow, &principal.user_id, now).await?;

    let message = match uow.find_cart_item(cart.id, book_id).await? {
        Some(existing) => {
            let new_quantity = existing.quantity + quantity;
            if new_quantity > book.stock {
                return Err(AppError::bad_request(format!(
                    "Cannot add {} more. Total would exceed available stock of {}",
                    quantity, book.stock
                )));
            }
            if new_quantity > MAX_QUANTITY_PER_ITEM {
                return Err(AppError::bad_request("Maximum quantity per item is 99"));
            }
            uow.update_cart_item_quantity(existing.id, new_quantity).await?;
            format!(
                "Cart updated - \"{}\" quantity increased to {}",
                book.title, new_quantity
            )
        }
        None => {
            uow.insert_cart_item(&CartItem {
                id: Uuid::new_v4(),
                cart_id: cart.id,
                book_id,
                quantity,
                created_at: now,
            })
            .await?;
            "Book added to cart successfully".to_string()
        }
    };

    let totals = compute_totals(&mut *uow, cart.id).await?;
    uow.commit().await?;

    metrics::record_cart_operation("add");
    tracing::info!(
        user = %principal.user_id,
        book_id = %book_id,
        quantity,
        cart_items = totals.item_count,
        "Added to cart"
    );

    Ok(totals.into_response(message))
}

/// `updateCartItem(itemId, quantity)`: sets the line to `quantity`
pub async fn update_cart_item(
    store: &dyn Store,
    principal: &Principal,
    item_id: Uuid,
    request: &UpdateCartItemRequest,
) -> AppResult<CartResponse> {
    let quantity = request
        .quantity
        .ok_or_else(|| AppError::bad_request("Quantity is required"))?;
    check_quantity(quantity)?;

    let mut uow = store.begin().await?;
    let item = owned_item(&mut *uow, &principal.user_id, item_id).await?;

    let book = uow
        .get_book(item.book_id)
        .await?
        .ok_or_else(|| AppError::not_found("Book not found"))?;
    if book.stock < quantity {
        return Err(insufficient_stock(&book, quantity));
    }

    uow.update_cart_item_quantity(item.id, quantity).await?;
    let totals = compute_totals(&mut *uow, item.cart_id).await?;
    uow.commit().await?;

    metrics::record_cart_operation("update");
    Ok(totals.into_response("Cart item updated successfully"))
}

/// `removeFromCart(itemId)`
pub async fn remove_from_cart(
    store: &dyn Store,
    principal: &Principal,
    item_id: Uuid,
) -> AppResult<CartResponse> {
    let mut uow = store.begin().await?;
    let item = owned_item(&mut *uow, &principal.user_id, item_id).await?;

    uow.delete_cart_item(item.id).await?;
    let totals = compute_totals(&mut *uow, item.cart_id).await?;
    uow.commit().await?;

    metrics::record_cart_operation("remove");
    Ok(totals.into_response("Item removed from cart successfully"))
}

/// `clearCart()`: clearing an already empty cart succeeds
pub async fn clear_cart(store: &dyn Store, principal: &Principal) -> AppResult<CartResponse> {
    let mut uow = store.begin().await?;
    let cart = uow
        .find_active_cart(&principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found(MSG_NO_ACTIVE_CART))?;

    uow.delete_cart_items(cart.id).await?;
    uow.commit().await?;

    metrics::record_cart_operation("clear");
    Ok(CartResponse {
        cart_item_count: Some(0),
        cart_total: Some(Decimal::ZERO),
        ..CartResponse::message("Cart cleared successfully")
    })
}

/// `getCartSummary()`
pub async fn get_cart_summary(store: &dyn Store, principal: &Principal) -> AppResult<CartResponse> {
    let mut uow = store.begin().await?;
    let Some(cart) = uow.find_active_cart(&principal.user_id).await? else {
        return Ok(CartResponse::message(MSG_EMPTY));
    };

    let totals = compute_totals(&mut *uow, cart.id).await?;
    if totals.lines.is_empty() {
        return Ok(CartResponse::message(MSG_EMPTY));
    }

    let message = format!(
        "Cart contains {} items with total amount {}",
        totals.item_count,
        format_money(totals.total)
    );
    Ok(totals.into_response(message))
}
