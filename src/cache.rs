// =============================================================================
// BOOK DETAIL CACHE
// =============================================================================
// Optional Redis cache for the public book detail endpoint.
//
// Only display reads go through here. Purchases, carts and stock checks
// always read the store inside their unit of work, and a purchase drops the
// cached entries of the books it touched once it has committed.
// Cache errors are logged and otherwise ignored.
// =============================================================================

use std::time::Instant;

use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::metrics;
use crate::models::Book;

/// Seconds a cached book stays valid
const BOOK_TTL_SECS: u64 = 60;

#[derive(Clone, Default)]
pub struct BookCache {
    conn: Option<ConnectionManager>,
}

fn key(id: Uuid) -> String {
    format!("book:{}", id)
}

impl BookCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn: Some(conn) }
    }

    /// A cache that never hits
    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<Book> {
        let mut conn = self.conn.clone()?;
        let start = Instant::now();

        let cached: Option<String> = redis::cmd("GET")
            .arg(key(id))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| tracing::warn!(error = %e, "Book cache read failed"))
            .ok()
            .flatten();

        metrics::record_redis_operation("get", start.elapsed().as_secs_f64());
        cached.and_then(|json| serde_json::from_str(&json).ok())
    }

    pub async fn put(&self, book: &Book) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let Ok(json) = serde_json::to_string(book) else {
            return;
        };
        let start = Instant::now();

        let result: Result<(), _> = redis::cmd("SETEX")
            .arg(key(book.id))
            .arg(BOOK_TTL_SECS)
            .arg(json)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Book cache write failed");
        }

        metrics::record_redis_operation("set", start.elapsed().as_secs_f64());
    }

    pub async fn invalidate(&self, ids: &[Uuid]) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if ids.is_empty() {
            return;
        }
        let start = Instant::now();

        let keys: Vec<String> = ids.iter().copied().map(key).collect();
        let result: Result<(), _> = redis::cmd("DEL").arg(keys).query_async(&mut conn).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Book cache invalidation failed");
        }

        metrics::record_redis_operation("delete", start.elapsed().as_secs_f64());
    }

    pub async fn ping(&self) -> Option<bool> {
        let mut conn = self.conn.clone()?;
        Some(
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok(),
        )
    }
}
