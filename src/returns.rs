// =============================================================================
// RETURNS
// =============================================================================
// Customer return requests against delivered order lines, and the admin
// decision flow:
//
//   REQUESTED -> APPROVED | REJECTED
//   APPROVED  -> PROCESSED
//
// processed_date is stamped on the first decision and kept afterwards.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{OrderStatus, RequestReturnBody, ReturnRequest, ReturnStatus};
use crate::money::{format_money, line_total};
use crate::orders::generate_reference;
use crate::store::Store;

/// Days after the order date during which a return may be requested
pub const RETURN_WINDOW_DAYS: i64 = 30;

const MSG_NOT_OWNED: &str = "Order item not found or does not belong to you";

/// `requestReturn`. Returns the stored request and the confirmation message.
pub async fn request_return(
    store: &dyn Store,
    principal: &Principal,
    body: &RequestReturnBody,
    now: DateTime<Utc>,
) -> AppResult<(ReturnRequest, String)> {
    let reason = body.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
    let (Some(order_id), Some(book_id), Some(quantity), Some(reason)) =
        (body.order_id, body.book_id, body.quantity, reason)
    else {
        return Err(AppError::bad_request(
            "Order ID, Book ID, quantity, and reason are required",
        ));
    };
    if quantity < 1 {
        return Err(AppError::bad_request("Quantity must be at least 1"));
    }

    let mut uow = store.begin().await?;

    let order = uow
        .get_order(order_id)
        .await?
        .filter(|o| o.owner == principal.user_id)
        .ok_or_else(|| AppError::not_found(MSG_NOT_OWNED))?;
    let item = uow
        .find_order_item(order.id, book_id)
        .await?
        .ok_or_else(|| AppError::not_found(MSG_NOT_OWNED))?;

    if quantity > item.quantity {
        return Err(AppError::bad_request(format!(
            "Cannot return more items than purchased. Purchased: {}, Requested: {}",
            item.quantity, quantity
        )));
    }

    if order.status != OrderStatus::Delivered {
        return Err(AppError::bad_request(
            "Order must be delivered before requesting a return",
        ));
    }

    if now - order.order_date > Duration::days(RETURN_WINDOW_DAYS) {
        return Err(AppError::bad_request(
            "Return request must be made within 30 days of order date",
        ));
    }

    let request = ReturnRequest {
        id: Uuid::new_v4(),
        return_number: generate_reference("RET", now),
        order_id: order.id,
        book_id,
        owner: principal.user_id.clone(),
        quantity,
        reason: reason.to_string(),
        status: ReturnStatus::Requested,
        request_date: now,
        processed_date: None,
        refund_amount: line_total(item.unit_price, quantity),
    };
    uow.insert_return(&request).await?;
    uow.commit().await?;

    metrics::record_return_request();
    tracing::info!(
        return_number = %request.return_number,
        order_number = %order.order_number,
        refund = %request.refund_amount,
        "Return requested"
    );

    let message = format!(
        "Return request {} submitted successfully. Refund amount: {}",
        request.return_number,
        format_money(request.refund_amount)
    );
    Ok((request, message))
}

/// Admin: move a return request through its state machine
pub async fn update_return_status(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    next: ReturnStatus,
    now: DateTime<Utc>,
) -> AppResult<ReturnRequest> {
    principal.require_admin()?;

    let mut uow = store.begin().await?;
    let mut request = uow
        .get_return(id)
        .await?
        .ok_or_else(|| AppError::not_found("Return request not found"))?;

    if !request.status.can_transition_to(next) {
        return Err(AppError::bad_request(format!(
            "Cannot change return status from {} to {}",
            request.status, next
        )));
    }

    let processed_date = match request.processed_date {
        None if next.is_decision() => Some(now),
        _ => None,
    };
    uow.update_return_status(id, next, processed_date).await?;
    uow.commit().await?;

    tracing::info!(return_number = %request.return_number, from = %request.status, to = %next, "Return status changed");

    request.status = next;
    if processed_date.is_some() {
        request.processed_date = processed_date;
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{Book, OrderContact, PurchaseItem, PurchaseRequest};
    use crate::orders::{purchase_books, PlacedOrder};
    use rust_decimal::Decimal;

    async fn ordered(quantity: i32, placed_at: DateTime<Utc>) -> (MemoryStore, PlacedOrder) {
        let store = MemoryStore::new();
        let book = Book {
            id: Uuid::new_v4(),
            title: "SPQR".into(),
            author: "Mary Beard".into(),
            price: Decimal::new(2450, 2),
            stock: 10,
        };
        store.put_book(book.clone(), vec![]).await;
        let request = PurchaseRequest {
            items: vec![PurchaseItem { book_id: book.id, quantity }],
            discount_code: None,
            contact: OrderContact::default(),
        };
        let placed = purchase_books(&store, &Principal::customer("alice"), &request, placed_at)
            .await
            .unwrap();
        (store, placed)
    }

    async fn deliver(store: &MemoryStore, placed: &PlacedOrder) {
        let mut order = placed.order.clone();
        order.status = OrderStatus::Delivered;
        store.put_order(order).await;
    }

    fn body(placed: &PlacedOrder, quantity: i32) -> RequestReturnBody {
        RequestReturnBody {
            order_id: Some(placed.order.id),
            book_id: Some(placed.items[0].book_id),
            quantity: Some(quantity),
            reason: Some("Damaged cover".into()),
        }
    }

    #[tokio::test]
    async fn test_pending_order_cannot_be_returned() {
        let (store, placed) = ordered(2, Utc::now()).await;
        let err = request_return(&store, &Principal::customer("alice"), &body(&placed, 1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.to_string(), "Order must be delivered before requesting a return");
    }

    #[tokio::test]
    async fn test_delivered_order_return() {
        let (store, placed) = ordered(2, Utc::now()).await;
        deliver(&store, &placed).await;

        let (request, message) =
            request_return(&store, &Principal::customer("alice"), &body(&placed, 2), Utc::now())
                .await
                .unwrap();

        assert_eq!(request.status, ReturnStatus::Requested);
        assert_eq!(request.refund_amount, Decimal::new(4900, 2));
        assert!(request.return_number.starts_with("RET-"));
        assert_eq!(
            message,
            format!(
                "Return request {} submitted successfully. Refund amount: $49.00",
                request.return_number
            )
        );
    }

    #[tokio::test]
    async fn test_return_guards() {
        let (store, placed) = ordered(2, Utc::now() - Duration::days(31)).await;
        deliver(&store, &placed).await;
        let alice = Principal::customer("alice");

        let err = request_return(&store, &alice, &body(&placed, 3), Utc::now()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot return more items than purchased. Purchased: 2, Requested: 3"
        );

        let err = request_return(&store, &alice, &body(&placed, 1), Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Return request must be made within 30 days of order date");

        let stranger = request_return(&store, &Principal::customer("bob"), &body(&placed, 1), Utc::now()).await;
        assert!(matches!(stranger, Err(AppError::NotFound(_))));

        let incomplete = RequestReturnBody {
            reason: Some("   ".into()),
            ..body(&placed, 1)
        };
        let err = request_return(&store, &alice, &incomplete, Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Order ID, Book ID, quantity, and reason are required");
    }

    #[tokio::test]
    async fn test_admin_status_transitions() {
        let (store, placed) = ordered(1, Utc::now()).await;
        deliver(&store, &placed).await;
        let (request, _) =
            request_return(&store, &Principal::customer("alice"), &body(&placed, 1), Utc::now())
                .await
                .unwrap();
        let admin = Principal::admin("ops");

        let forbidden =
            update_return_status(&store, &Principal::customer("alice"), request.id, ReturnStatus::Approved, Utc::now()).await;
        assert!(matches!(forbidden, Err(AppError::Forbidden(_))));

        let skip = update_return_status(&store, &admin, request.id, ReturnStatus::Processed, Utc::now()).await;
        assert!(matches!(skip, Err(AppError::BadRequest(_))));

        let approved_at = Utc::now();
        let approved = update_return_status(&store, &admin, request.id, ReturnStatus::Approved, approved_at)
            .await
            .unwrap();
        assert_eq!(approved.processed_date, Some(approved_at));

        let processed = update_return_status(
            &store,
            &admin,
            request.id,
            ReturnStatus::Processed,
            approved_at + Duration::days(2),
        )
        .await
        .unwrap();
        assert_eq!(processed.status, ReturnStatus::Processed);
        assert_eq!(processed.processed_date, Some(approved_at));

        let missing = update_return_status(&store, &admin, Uuid::new_v4(), ReturnStatus::Approved, Utc::now()).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
