// =============================================================================
// ADMIN ACTIONS
// =============================================================================
// Discount code management and order status changes. Every action checks
// the admin role on the principal first.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use crate::models::{CreateDiscountRequest, DiscountCode, DiscountType, Order, OrderStatus};
use crate::store::Store;

// =============================================================================
// DISCOUNT CODES
// =============================================================================

pub async fn list_discounts(store: &dyn Store, principal: &Principal) -> AppResult<Vec<DiscountCode>> {
    principal.require_admin()?;
    let mut uow = store.begin().await?;
    uow.list_discounts().await
}

/// Checks run in order; the first failure is reported.
pub async fn create_discount(
    store: &dyn Store,
    principal: &Principal,
    request: &CreateDiscountRequest,
    now: DateTime<Utc>,
) -> AppResult<DiscountCode> {
    principal.require_admin()?;

    let code = request.code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let (Some(code), Some(discount_type), Some(discount_value), Some(valid_from), Some(valid_to)) = (
        code,
        request.discount_type.as_deref(),
        request.discount_value,
        request.valid_from,
        request.valid_to,
    ) else {
        return Err(AppError::bad_request(
            "Code, discount type, discount value, valid from and valid to are required",
        ));
    };

    let discount_type: DiscountType = discount_type.parse().map_err(|_| {
        AppError::bad_request("Invalid discount type. Must be PERCENTAGE or FIXED_AMOUNT")
    })?;

    if discount_value <= Decimal::ZERO {
        return Err(AppError::bad_request("Discount value must be greater than 0"));
    }
    if discount_type == DiscountType::Percentage && discount_value > Decimal::ONE_HUNDRED {
        return Err(AppError::bad_request("Percentage discount cannot exceed 100%"));
    }
    if valid_from >= valid_to {
        return Err(AppError::bad_request("Valid from date must be before valid to date"));
    }

    let min_order_amount = request.min_order_amount.unwrap_or(Decimal::ZERO);
    if min_order_amount < Decimal::ZERO {
        return Err(AppError::bad_request("Minimum order amount cannot be negative"));
    }
    if matches!(request.max_discount, Some(cap) if cap < Decimal::ZERO) {
        return Err(AppError::bad_request("Maximum discount cannot be negative"));
    }
    if matches!(request.usage_limit, Some(limit) if limit < 1) {
        return Err(AppError::bad_request("Usage limit must be at least 1"));
    }

    let mut uow = store.begin().await?;
    if uow.find_discount_by_code(code).await?.is_some() {
        return Err(AppError::bad_request(format!(
            "Discount code '{}' already exists",
            code
        )));
    }

    let discount = DiscountCode {
        id: Uuid::new_v4(),
        code: code.to_string(),
        description: request.description.clone(),
        discount_type,
        discount_value,
        valid_from,
        valid_to,
        min_order_amount,
        max_discount: request.max_discount,
        usage_limit: request.usage_limit,
        used_count: 0,
        is_active: request.is_active.unwrap_or(true),
        created_at: now,
    };
    uow.insert_discount(&discount).await?;
    uow.commit().await?;

    tracing::info!(code = %discount.code, kind = ?discount.discount_type, value = %discount.discount_value, "Discount code created");
    Ok(discount)
}

/// Activate or deactivate; returns the confirmation message
pub async fn set_discount_active(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    active: bool,
) -> AppResult<String> {
    principal.require_admin()?;

    let mut uow = store.begin().await?;
    let discount = uow
        .get_discount(id)
        .await?
        .ok_or_else(|| AppError::not_found("Discount code not found"))?;

    uow.set_discount_active(id, active).await?;
    uow.commit().await?;

    let verb = if active { "activated" } else { "deactivated" };
    tracing::info!(code = %discount.code, verb, "Discount code toggled");
    Ok(format!("Discount code '{}' {} successfully", discount.code, verb))
}

// =============================================================================
// ORDERS
// =============================================================================

/// DELIVERED stamps delivered_date, CANCELLED stamps cancelled_date
pub async fn update_order_status(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> AppResult<Order> {
    principal.require_admin()?;

    let mut uow = store.begin().await?;
    let mut order = uow
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;

    let delivered_date = (status == OrderStatus::Delivered).then_some(now);
    let cancelled_date = (status == OrderStatus::Cancelled).then_some(now);
    uow.update_order_status(id, status, delivered_date, cancelled_date)
        .await?;
    uow.commit().await?;

    tracing::info!(order_number = %order.order_number, from = %order.status, to = %status, "Order status changed");

    order.status = status;
    order.delivered_date = delivered_date.or(order.delivered_date);
    order.cancelled_date = cancelled_date.or(order.cancelled_date);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{Book, OrderContact, PurchaseItem, PurchaseRequest};
    use crate::orders::purchase_books;
    use chrono::Duration;

    fn request(code: &str, kind: &str, value: i64) -> CreateDiscountRequest {
        let now = Utc::now();
        CreateDiscountRequest {
            code: Some(code.into()),
            discount_type: Some(kind.into()),
            discount_value: Some(Decimal::new(value, 0)),
            valid_from: Some(now),
            valid_to: Some(now + Duration::days(30)),
            ..Default::default()
        }
    }

    async fn rejection(store: &MemoryStore, req: &CreateDiscountRequest) -> String {
        match create_discount(store, &Principal::admin("ops"), req, Utc::now()).await {
            Err(AppError::BadRequest(msg)) => msg,
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_discount_defaults() {
        let store = MemoryStore::new();
        let created = create_discount(
            &store,
            &Principal::admin("ops"),
            &request("SPRING20", "PERCENTAGE", 20),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(created.is_active);
        assert_eq!(created.used_count, 0);
        assert_eq!(created.min_order_amount, Decimal::ZERO);
        assert_eq!(created.discount_type, DiscountType::Percentage);

        let all = list_discounts(&store, &Principal::admin("ops")).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_create_discount_validation_order() {
        let store = MemoryStore::new();

        let mut missing = request("X", "PERCENTAGE", 10);
        missing.valid_to = None;
        assert!(rejection(&store, &missing).await.contains("are required"));

        assert_eq!(
            rejection(&store, &request("X", "BOGO", 10)).await,
            "Invalid discount type. Must be PERCENTAGE or FIXED_AMOUNT"
        );
        assert_eq!(
            rejection(&store, &request("X", "FIXED_AMOUNT", 0)).await,
            "Discount value must be greater than 0"
        );
        assert_eq!(
            rejection(&store, &request("X", "PERCENTAGE", 101)).await,
            "Percentage discount cannot exceed 100%"
        );
        // fixed amounts above 100 are fine
        assert!(create_discount(&store, &Principal::admin("ops"), &request("BIG", "FIXED_AMOUNT", 150), Utc::now())
            .await
            .is_ok());

        let mut backwards = request("X", "PERCENTAGE", 10);
        backwards.valid_to = backwards.valid_from;
        assert_eq!(
            rejection(&store, &backwards).await,
            "Valid from date must be before valid to date"
        );

        let mut negative_minimum = request("X", "PERCENTAGE", 10);
        negative_minimum.min_order_amount = Some(Decimal::new(-1, 0));
        assert_eq!(
            rejection(&store, &negative_minimum).await,
            "Minimum order amount cannot be negative"
        );

        let mut negative_cap = request("X", "PERCENTAGE", 10);
        negative_cap.max_discount = Some(Decimal::new(-5, 0));
        assert_eq!(
            rejection(&store, &negative_cap).await,
            "Maximum discount cannot be negative"
        );

        for limit in [0, -3] {
            let mut bad_limit = request("X", "PERCENTAGE", 10);
            bad_limit.usage_limit = Some(limit);
            assert_eq!(
                rejection(&store, &bad_limit).await,
                "Usage limit must be at least 1"
            );
        }
        assert!(list_discounts(&store, &Principal::admin("ops"))
            .await
            .unwrap()
            .iter()
            .all(|d| d.code != "X"));

        assert_eq!(
            rejection(&store, &request("BIG", "PERCENTAGE", 10)).await,
            "Discount code 'BIG' already exists"
        );
    }

    #[tokio::test]
    async fn test_admin_role_required() {
        let store = MemoryStore::new();
        let alice = Principal::customer("alice");
        assert!(matches!(
            create_discount(&store, &alice, &request("X", "PERCENTAGE", 10), Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            list_discounts(&store, &alice).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            update_order_status(&store, &alice, Uuid::new_v4(), OrderStatus::Shipped, Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_discount() {
        let store = MemoryStore::new();
        let admin = Principal::admin("ops");
        let created = create_discount(&store, &admin, &request("FLASH", "FIXED_AMOUNT", 5), Utc::now())
            .await
            .unwrap();

        let message = set_discount_active(&store, &admin, created.id, false).await.unwrap();
        assert_eq!(message, "Discount code 'FLASH' deactivated successfully");
        assert!(!store.discount(created.id).await.unwrap().is_active);

        let message = set_discount_active(&store, &admin, created.id, true).await.unwrap();
        assert_eq!(message, "Discount code 'FLASH' activated successfully");

        let missing = set_discount_active(&store, &admin, Uuid::new_v4(), true).await;
        match missing {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Discount code not found"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_order_status_dates() {
        let store = MemoryStore::new();
        let book = Book {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            price: Decimal::new(1999, 2),
            stock: 5,
        };
        store.put_book(book.clone(), vec![]).await;
        let purchase = PurchaseRequest {
            items: vec![PurchaseItem { book_id: book.id, quantity: 1 }],
            discount_code: None,
            contact: OrderContact::default(),
        };
        let placed = purchase_books(&store, &Principal::customer("alice"), &purchase, Utc::now())
            .await
            .unwrap();
        let admin = Principal::admin("ops");

        let shipped = update_order_status(&store, &admin, placed.order.id, OrderStatus::Shipped, Utc::now())
            .await
            .unwrap();
        assert_eq!(shipped.delivered_date, None);

        let delivered_at = Utc::now();
        let delivered =
            update_order_status(&store, &admin, placed.order.id, OrderStatus::Delivered, delivered_at)
                .await
                .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.delivered_date, Some(delivered_at));
        assert_eq!(delivered.cancelled_date, None);

        let missing = update_order_status(&store, &admin, Uuid::new_v4(), OrderStatus::Cancelled, Utc::now()).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
