// =============================================================================
// BOOKSTORE ORDER SERVICE - Main Entry Point
// =============================================================================
// Purchase, cart, discount, return and review actions for the bookstore.
//
// WHAT THIS SERVICE DOES:
// - Turns purchase requests and shopping carts into orders, atomically
//   decrementing stock and redeeming discount codes
// - Validates discount codes and previews order totals
// - Accepts return requests and reviews, and serves recommendations
// - Exposes Prometheus metrics and optionally caches book details in Redis
// =============================================================================

// -----------------------------------------------------------------------------
// MODULE DECLARATIONS
// -----------------------------------------------------------------------------
mod admin;           // Admin discount and status actions (admin.rs)
mod auth;            // Principal extractor (auth.rs)
mod cache;           // Redis book detail cache (cache.rs)
mod cart;            // Cart aggregator (cart.rs)
mod catalog;         // Book lookups (catalog.rs)
mod config;          // Configuration loading (config.rs)
mod db;              // PostgreSQL store (db.rs)
mod discount;        // Discount evaluator (discount.rs)
mod error;           // Error types (error.rs)
mod handlers;        // HTTP request handlers (handlers.rs)
mod memory;          // In-process store (memory.rs)
mod metrics;         // Prometheus metrics setup (metrics.rs)
mod models;          // Data structures (models.rs)
mod money;           // Decimal rounding and formatting (money.rs)
mod orders;          // Order processor (orders.rs)
mod recommendations; // Recommendation query (recommendations.rs)
mod returns;         // Return requests (returns.rs)
mod reviews;         // Reviews (reviews.rs)
mod seed;            // Sample catalog and codes (seed.rs)
mod store;           // Store / UnitOfWork seam (store.rs)

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::BookCache;
use crate::config::{Config, StorageBackend};
use crate::db::PgStore;
use crate::memory::MemoryStore;
use crate::metrics::setup_metrics;
use crate::store::Store;

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Shared by every handler through State<Arc<AppState>>.
pub struct AppState {
    /// Orders, carts, catalog: Postgres or in-memory
    pub store: Arc<dyn Store>,

    /// Book detail cache, inert when REDIS_URL is unset
    pub cache: BookCache,

    /// Renders metrics in Prometheus format
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // ----- Health, Readiness & Metrics -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Catalog -----
        .route("/api/v1/books/:id", get(handlers::get_book))
        // ----- Orders -----
        .route(
            "/api/v1/orders",
            get(handlers::order_history).post(handlers::create_order_forbidden),
        )
        .route("/api/v1/orders/purchase", post(handlers::purchase_books))
        .route(
            "/api/v1/orders/calculate-total",
            post(handlers::calculate_order_total),
        )
        .route(
            "/api/v1/orders/:id",
            patch(handlers::modify_order_forbidden)
                .put(handlers::modify_order_forbidden)
                .delete(handlers::delete_order_forbidden),
        )
        .route("/api/v1/discounts/validate", post(handlers::validate_discount))
        // ----- Returns, Reviews, Recommendations -----
        .route("/api/v1/returns", post(handlers::create_return_forbidden))
        .route("/api/v1/returns/request", post(handlers::request_return))
        .route(
            "/api/v1/returns/:id",
            patch(handlers::modify_return_forbidden)
                .put(handlers::modify_return_forbidden)
                .delete(handlers::delete_return_forbidden),
        )
        .route("/api/v1/reviews", post(handlers::submit_review))
        .route(
            "/api/v1/reviews/can-review/:book_id",
            get(handlers::can_review),
        )
        .route("/api/v1/recommendations", get(handlers::get_recommendations))
        // ----- Cart -----
        .route(
            "/api/v1/cart",
            get(handlers::get_cart_summary).delete(handlers::clear_cart),
        )
        .route("/api/v1/cart/items", post(handlers::add_to_cart))
        .route(
            "/api/v1/cart/items/:id",
            patch(handlers::update_cart_item).delete(handlers::remove_from_cart),
        )
        .route("/api/v1/cart/purchase", post(handlers::purchase_from_cart))
        // ----- Admin -----
        .route(
            "/api/v1/admin/discounts",
            get(handlers::list_discounts).post(handlers::create_discount),
        )
        .route(
            "/api/v1/admin/discounts/:id/activate",
            post(handlers::activate_discount),
        )
        .route(
            "/api/v1/admin/discounts/:id/deactivate",
            post(handlers::deactivate_discount),
        )
        .route(
            "/api/v1/admin/orders/:id/status",
            patch(handlers::update_order_status),
        )
        .route(
            "/api/v1/admin/returns/:id/status",
            patch(handlers::update_return_status),
        )
        // ----- Middleware Layers -----
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -----------------------------------------------------------------------------
// STORE SELECTION
// -----------------------------------------------------------------------------
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;
            let db = PgStore::connect(url, config.db_max_connections).await?;
            info!("Connected to PostgreSQL");

            db.run_migrations().await?;
            info!("Database migrations completed");

            if config.seed_sample_data {
                db.seed_sample_data().await?;
            }
            Ok(Arc::new(db) as Arc<dyn Store>)
        }
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            if config.seed_sample_data {
                seed::seed_memory_store(&store).await;
                info!("Seeded in-memory store with sample data");
            }
            Ok(Arc::new(store) as Arc<dyn Store>)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Environment and logging
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bookstore_order_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Bookstore Order Service...");

    // -------------------------------------------------------------------------
    // STEP 2: Configuration and metrics
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(port = config.port, storage = ?config.storage, "Configuration loaded");

    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 3: Store and cache
    // -------------------------------------------------------------------------
    let store = open_store(&config).await?;

    // ConnectionManager reconnects on its own
    let cache = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            info!("Connected to Redis");
            BookCache::new(conn)
        }
        None => {
            info!("REDIS_URL not set, book cache disabled");
            BookCache::disabled()
        }
    };

    let state = Arc::new(AppState {
        store,
        cache,
        metrics_handle,
    });

    // -------------------------------------------------------------------------
    // STEP 4: Serve
    // -------------------------------------------------------------------------
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Bookstore Order Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
