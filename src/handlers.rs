// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer).
//
// Handlers stay thin: extract the principal and body, call one business
// operation, record the request metric, shape the response. All rules live
// in the operation modules (orders, cart, returns, reviews, admin).
//
// AXUM EXTRACTORS USED:
// - State<Arc<AppState>>: shared store, cache and metrics handle
// - Principal:            caller identity from the gateway headers
// - Path<Uuid>:           entity id from the URL
// - AppJson<T>:           JSON body; a malformed body is a 400 AppError
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{FromRequest, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::{admin, cart, catalog, discount, metrics, orders, recommendations, returns, reviews};
use crate::AppState;

/// `Json<T>` whose rejection is an `AppError`, so bad bodies get the same
/// error envelope as everything else.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Records the request metric with the status the result maps to
fn observe<T>(method: &str, endpoint: &str, start: Instant, result: AppResult<T>) -> AppResult<T> {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    metrics::record_http_request(method, endpoint, status.as_u16(), start.elapsed().as_secs_f64());
    result
}

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "bookstore-order-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: the store must answer; Redis only counts when configured.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let store_healthy = state.store.health_check().await;
    let redis_healthy = state.cache.ping().await;

    let all_healthy = store_healthy && redis_healthy.unwrap_or(true);
    let status = if all_healthy { "ready" } else { "not_ready" };

    let response = ReadinessResponse {
        status: status.to_string(),
        checks: ReadinessChecks {
            store: store_healthy,
            redis: redis_healthy,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// CATALOG
// =============================================================================

/// Book detail, served from the Redis cache when it has the entry
///
/// GET /api/v1/books/:id
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Book>> {
    let start = Instant::now();

    if let Some(book) = state.cache.get(id).await {
        return observe("GET", "/api/v1/books/:id", start, Ok(Json(book)));
    }

    let result = catalog::get_book(state.store.as_ref(), id).await;
    if let Ok(book) = &result {
        state.cache.put(book).await;
    }
    observe("GET", "/api/v1/books/:id", start, result.map(Json))
}

// =============================================================================
// ORDERS
// =============================================================================

/// POST /api/v1/orders/purchase
///
/// # Request Body
/// ```json
/// {
///   "items": [{ "bookId": "…", "quantity": 1 }],
///   "discountCode": "SAVE10",
///   "shippingAddress": "1 Main St"
/// }
/// ```
pub async fn purchase_books(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(request): AppJson<PurchaseRequest>,
) -> AppResult<Json<MessageResponse>> {
    let start = Instant::now();

    let result = orders::purchase_books(state.store.as_ref(), &principal, &request, Utc::now()).await;
    if let Ok(placed) = &result {
        state.cache.invalidate(&placed.book_ids()).await;
    }

    observe("POST", "/api/v1/orders/purchase", start, result)
        .map(|placed| Json(MessageResponse::new(placed.message)))
}

/// POST /api/v1/orders/calculate-total
pub async fn calculate_order_total(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    AppJson(request): AppJson<CalculateTotalRequest>,
) -> AppResult<Json<OrderTotal>> {
    let start = Instant::now();
    let result = orders::calculate_order_total(state.store.as_ref(), &request, Utc::now()).await;
    observe("POST", "/api/v1/orders/calculate-total", start, result.map(Json))
}

/// GET /api/v1/orders
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Vec<Order>>> {
    let start = Instant::now();
    let result = orders::order_history(state.store.as_ref(), &principal).await;
    observe("GET", "/api/v1/orders", start, result.map(Json))
}

/// POST /api/v1/discounts/validate
pub async fn validate_discount(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    AppJson(request): AppJson<ValidateDiscountRequest>,
) -> AppResult<Json<DiscountValidation>> {
    let start = Instant::now();
    let result = discount::validate_discount_code(
        state.store.as_ref(),
        request.discount_code.as_deref(),
        request.order_total,
        Utc::now(),
    )
    .await;
    observe("POST", "/api/v1/discounts/validate", start, result.map(Json))
}

// -----------------------------------------------------------------------------
// BLOCKED GENERIC MUTATIONS
// -----------------------------------------------------------------------------
// Orders and returns only come into existence through their actions, and
// customers never edit them afterwards.

pub async fn create_order_forbidden() -> AppError {
    AppError::forbidden("Orders must be created through the purchaseBooks action")
}

pub async fn modify_order_forbidden() -> AppError {
    AppError::forbidden("Orders cannot be modified by customers")
}

pub async fn delete_order_forbidden() -> AppError {
    AppError::forbidden("Orders cannot be deleted by customers")
}

pub async fn create_return_forbidden() -> AppError {
    AppError::forbidden("Returns must be created through the requestReturn action")
}

pub async fn modify_return_forbidden() -> AppError {
    AppError::forbidden("Return requests cannot be modified by customers")
}

pub async fn delete_return_forbidden() -> AppError {
    AppError::forbidden("Return requests cannot be deleted by customers")
}

// =============================================================================
// RETURNS & REVIEWS
// =============================================================================

/// POST /api/v1/returns/request
pub async fn request_return(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(body): AppJson<RequestReturnBody>,
) -> AppResult<Json<MessageResponse>> {
    let start = Instant::now();
    let result = returns::request_return(state.store.as_ref(), &principal, &body, Utc::now()).await;
    observe("POST", "/api/v1/returns/request", start, result)
        .map(|(_, message)| Json(MessageResponse::new(message)))
}

/// POST /api/v1/reviews
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(request): AppJson<SubmitReviewRequest>,
) -> AppResult<Json<MessageResponse>> {
    let start = Instant::now();
    let result = reviews::submit_review(state.store.as_ref(), &principal, &request, Utc::now()).await;
    observe("POST", "/api/v1/reviews", start, result)
        .map(|(_, message)| Json(MessageResponse::new(message)))
}

/// GET /api/v1/reviews/can-review/:book_id
pub async fn can_review(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(book_id): Path<Uuid>,
) -> AppResult<Json<CanReviewResponse>> {
    let start = Instant::now();
    let result = reviews::can_review(state.store.as_ref(), &principal, book_id).await;
    observe("GET", "/api/v1/reviews/can-review/:book_id", start, result)
        .map(|can_review| Json(CanReviewResponse { can_review }))
}

/// GET /api/v1/recommendations
pub async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Vec<Book>>> {
    let start = Instant::now();
    let result = recommendations::get_recommendations(state.store.as_ref(), &principal).await;
    observe("GET", "/api/v1/recommendations", start, result.map(Json))
}

// =============================================================================
// CART
// =============================================================================

/// POST /api/v1/cart/items
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(request): AppJson<AddToCartRequest>,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();
    let result = cart::add_to_cart(state.store.as_ref(), &principal, &request, Utc::now()).await;
    observe("POST", "/api/v1/cart/items", start, result.map(Json))
}

/// PATCH /api/v1/cart/items/:id
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(item_id): Path<Uuid>,
    AppJson(request): AppJson<UpdateCartItemRequest>,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();
    let result = cart::update_cart_item(state.store.as_ref(), &principal, item_id, &request).await;
    observe("PATCH", "/api/v1/cart/items/:id", start, result.map(Json))
}

/// DELETE /api/v1/cart/items/:id
pub async fn remove_from_cart(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();
    let result = cart::remove_from_cart(state.store.as_ref(), &principal, item_id).await;
    observe("DELETE", "/api/v1/cart/items/:id", start, result.map(Json))
}

/// DELETE /api/v1/cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();
    let result = cart::clear_cart(state.store.as_ref(), &principal).await;
    observe("DELETE", "/api/v1/cart", start, result.map(Json))
}

/// GET /api/v1/cart
pub async fn get_cart_summary(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();
    let result = cart::get_cart_summary(state.store.as_ref(), &principal).await;
    observe("GET", "/api/v1/cart", start, result.map(Json))
}

/// POST /api/v1/cart/purchase
pub async fn purchase_from_cart(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(request): AppJson<PurchaseFromCartRequest>,
) -> AppResult<Json<CartResponse>> {
    let start = Instant::now();

    let result =
        orders::purchase_from_cart(state.store.as_ref(), &principal, &request, Utc::now()).await;
    if let Ok(placed) = &result {
        state.cache.invalidate(&placed.book_ids()).await;
    }

    observe("POST", "/api/v1/cart/purchase", start, result).map(|placed| {
        Json(CartResponse {
            cart_item_count: Some(0),
            cart_total: Some(rust_decimal::Decimal::ZERO),
            ..CartResponse::message(placed.message)
        })
    })
}

// =============================================================================
// ADMIN
// =============================================================================

/// GET /api/v1/admin/discounts
pub async fn list_discounts(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Vec<DiscountCode>>> {
    let start = Instant::now();
    let result = admin::list_discounts(state.store.as_ref(), &principal).await;
    observe("GET", "/api/v1/admin/discounts", start, result.map(Json))
}

/// POST /api/v1/admin/discounts
pub async fn create_discount(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    AppJson(request): AppJson<CreateDiscountRequest>,
) -> AppResult<(StatusCode, Json<DiscountCode>)> {
    let start = Instant::now();
    let result = admin::create_discount(state.store.as_ref(), &principal, &request, Utc::now()).await;
    observe("POST", "/api/v1/admin/discounts", start, result)
        .map(|created| (StatusCode::CREATED, Json(created)))
}

/// POST /api/v1/admin/discounts/:id/activate
pub async fn activate_discount(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let start = Instant::now();
    let result = admin::set_discount_active(state.store.as_ref(), &principal, id, true).await;
    observe("POST", "/api/v1/admin/discounts/:id/activate", start, result)
        .map(|message| Json(MessageResponse::new(message)))
}

/// POST /api/v1/admin/discounts/:id/deactivate
pub async fn deactivate_discount(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let start = Instant::now();
    let result = admin::set_discount_active(state.store.as_ref(), &principal, id, false).await;
    observe("POST", "/api/v1/admin/discounts/:id/deactivate", start, result)
        .map(|message| Json(MessageResponse::new(message)))
}

/// PATCH /api/v1/admin/orders/:id/status
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<UpdateOrderStatusRequest>,
) -> AppResult<Json<Order>> {
    let start = Instant::now();
    let result =
        admin::update_order_status(state.store.as_ref(), &principal, id, request.status, Utc::now())
            .await;
    observe("PATCH", "/api/v1/admin/orders/:id/status", start, result.map(Json))
}

/// PATCH /api/v1/admin/returns/:id/status
pub async fn update_return_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<UpdateReturnStatusRequest>,
) -> AppResult<Json<ReturnRequest>> {
    let start = Instant::now();
    let result =
        returns::update_return_status(state.store.as_ref(), &principal, id, request.status, Utc::now())
            .await;
    observe("PATCH", "/api/v1/admin/returns/:id/status", start, result.map(Json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BookCache;
    use crate::memory::MemoryStore;
    use crate::seed::{sample_books, seed_memory_store};
    use axum::response::IntoResponse;
    use metrics_exporter_prometheus::PrometheusBuilder;

    async fn state() -> (Arc<AppState>, MemoryStore) {
        let store = MemoryStore::new();
        seed_memory_store(&store).await;
        let state = Arc::new(AppState {
            store: Arc::new(store.clone()),
            cache: BookCache::disabled(),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        });
        (state, store)
    }

    fn dune() -> Book {
        sample_books()
            .into_iter()
            .map(|(b, _)| b)
            .find(|b| b.title == "Dune")
            .unwrap()
    }

    #[tokio::test]
    async fn test_purchase_handler_returns_message() {
        let (state, store) = state().await;
        let request = PurchaseRequest {
            items: vec![PurchaseItem { book_id: dune().id, quantity: 1 }],
            ..Default::default()
        };

        let Json(response) = purchase_books(
            State(state),
            Principal::customer("alice"),
            AppJson(request),
        )
        .await
        .unwrap();

        assert!(response.message.contains("$19.99"));
        assert_eq!(store.book(dune().id).await.unwrap().stock, 4);
    }

    #[tokio::test]
    async fn test_get_book_without_cache() {
        let (state, _) = state().await;
        let Json(book) = get_book(State(state.clone()), Path(dune().id)).await.unwrap();
        assert_eq!(book, dune());

        let missing = get_book(State(state), Path(Uuid::new_v4())).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_direct_mutations_are_forbidden() {
        for err in [
            create_order_forbidden().await,
            modify_order_forbidden().await,
            delete_order_forbidden().await,
            create_return_forbidden().await,
            modify_return_forbidden().await,
            delete_return_forbidden().await,
        ] {
            assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn test_readiness_without_redis() {
        let (state, _) = state().await;
        let Json(ready) = readiness_check(State(state)).await.unwrap();
        assert_eq!(ready.status, "ready");
        assert!(ready.checks.store);
        assert_eq!(ready.checks.redis, None);
    }
}
