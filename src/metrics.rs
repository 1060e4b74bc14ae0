// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the order service, scraped from GET /metrics.
//
// Counters cover the business events (orders, redemptions, cart edits,
// returns, rejected purchases); histograms cover HTTP and Redis latency.
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES (Constants)
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: source (direct/cart)
pub const ORDERS_CREATED_TOTAL: &str = "orders_created_total";

/// Sum of order totals after discount, in cents
pub const ORDER_REVENUE_CENTS_TOTAL: &str = "order_revenue_cents_total";

/// Labels: code
pub const DISCOUNT_REDEMPTIONS_TOTAL: &str = "discount_redemptions_total";

/// Labels: reason (not_found/insufficient_stock/validation)
pub const PURCHASE_FAILURES_TOTAL: &str = "purchase_failures_total";

/// Labels: operation (add/update/remove/clear)
pub const CART_OPERATIONS_TOTAL: &str = "cart_operations_total";

pub const RETURN_REQUESTS_TOTAL: &str = "return_requests_total";

/// Labels: operation (get/set/delete)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Install the global Prometheus recorder and return the render handle
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(REDIS_OPERATION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(ORDERS_CREATED_TOTAL, "Orders created by purchase actions");
    describe_counter!(
        ORDER_REVENUE_CENTS_TOTAL,
        "Sum of order totals after discounts, in cents"
    );
    describe_counter!(DISCOUNT_REDEMPTIONS_TOTAL, "Discount codes applied to orders");
    describe_counter!(PURCHASE_FAILURES_TOTAL, "Purchases rejected before any write");
    describe_counter!(CART_OPERATIONS_TOTAL, "Successful shopping cart edits");
    describe_counter!(RETURN_REQUESTS_TOTAL, "Return requests submitted");
    describe_histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "Redis operation latency in seconds"
    );

    Ok(handle)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================
// Without an installed recorder (unit tests) these are no-ops.

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_order_created(source: &'static str, total_cents: u64) {
    counter!(ORDERS_CREATED_TOTAL, "source" => source).increment(1);
    counter!(ORDER_REVENUE_CENTS_TOTAL).increment(total_cents);
}

pub fn record_discount_redemption(code: &str) {
    counter!(DISCOUNT_REDEMPTIONS_TOTAL, "code" => code.to_string()).increment(1);
}

pub fn record_purchase_failure(reason: &'static str) {
    counter!(PURCHASE_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_cart_operation(operation: &'static str) {
    counter!(CART_OPERATIONS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_return_request() {
    counter!(RETURN_REQUESTS_TOTAL).increment(1);
}

pub fn record_redis_operation(operation: &str, duration_secs: f64) {
    histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}
