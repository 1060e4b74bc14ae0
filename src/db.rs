// =============================================================================
// DATABASE MODULE
// =============================================================================
// PostgreSQL implementation of the Store / UnitOfWork seam.
//
// - Each unit of work is one SQLx transaction; dropping it rolls back
// - Stock and discount usage are changed with conditional UPDATEs, so two
//   concurrent purchases of the last unit cannot both succeed
// - A partial unique index keeps one ACTIVE cart per user
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Book, Cart, CartItem, CartStatus, DiscountCode, Order, OrderItem, OrderStatus,
    ReturnRequest, ReturnStatus, Review,
};
use crate::seed;
use crate::store::{Store, UnitOfWork};

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound on pooled connections
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create tables and indexes if they don't exist
    pub async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id UUID PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                author VARCHAR(255) NOT NULL DEFAULT '',
                price NUMERIC(10, 2) NOT NULL,
                stock INTEGER NOT NULL DEFAULT 0,
                CONSTRAINT non_negative_price CHECK (price >= 0),
                CONSTRAINT non_negative_stock CHECK (stock >= 0)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id UUID PRIMARY KEY,
                name VARCHAR(100) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS book_categories (
                book_id UUID NOT NULL REFERENCES books(id),
                category_id UUID NOT NULL REFERENCES categories(id),
                PRIMARY KEY (book_id, category_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS discount_codes (
                id UUID PRIMARY KEY,
                code VARCHAR(50) UNIQUE NOT NULL,
                description TEXT,
                discount_type TEXT NOT NULL,
                discount_value NUMERIC(10, 2) NOT NULL,
                valid_from TIMESTAMPTZ NOT NULL,
                valid_to TIMESTAMPTZ NOT NULL,
                min_order_amount NUMERIC(10, 2) NOT NULL DEFAULT 0,
                max_discount NUMERIC(10, 2),
                usage_limit INTEGER,
                used_count INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT valid_discount_type CHECK (discount_type IN ('PERCENTAGE', 'FIXED_AMOUNT')),
                CONSTRAINT positive_discount_value CHECK (discount_value > 0),
                CONSTRAINT non_negative_used_count CHECK (used_count >= 0),
                CONSTRAINT non_negative_min_order CHECK (min_order_amount >= 0),
                CONSTRAINT non_negative_max_discount CHECK (max_discount IS NULL OR max_discount >= 0),
                CONSTRAINT positive_usage_limit CHECK (usage_limit IS NULL OR usage_limit > 0),
                CONSTRAINT valid_period CHECK (valid_from < valid_to)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS carts (
                id UUID PRIMARY KEY,
                owner VARCHAR(255) NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            // At most one ACTIVE cart per user
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_carts_one_active
                ON carts(owner) WHERE status = 'ACTIVE'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cart_items (
                id UUID PRIMARY KEY,
                cart_id UUID NOT NULL REFERENCES carts(id),
                book_id UUID NOT NULL REFERENCES books(id),
                quantity INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT cart_quantity_range CHECK (quantity BETWEEN 1 AND 99),
                UNIQUE (cart_id, book_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                order_number VARCHAR(50) UNIQUE NOT NULL,
                owner VARCHAR(255) NOT NULL,
                order_date TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                original_amount NUMERIC(12, 2) NOT NULL,
                discount_amount NUMERIC(12, 2) NOT NULL,
                total_amount NUMERIC(12, 2) NOT NULL,
                applied_discount_code UUID REFERENCES discount_codes(id),
                shipping_address TEXT,
                billing_address TEXT,
                customer_email VARCHAR(255),
                customer_phone VARCHAR(50),
                delivered_date TIMESTAMPTZ,
                cancelled_date TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_owner ON orders(owner)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS order_items (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL REFERENCES orders(id),
                book_id UUID NOT NULL REFERENCES books(id),
                quantity INTEGER NOT NULL,
                unit_price NUMERIC(10, 2) NOT NULL,
                total_price NUMERIC(12, 2) NOT NULL,
                CONSTRAINT positive_order_quantity CHECK (quantity > 0)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS return_requests (
                id UUID PRIMARY KEY,
                return_number VARCHAR(50) UNIQUE NOT NULL,
                order_id UUID NOT NULL REFERENCES orders(id),
                book_id UUID NOT NULL REFERENCES books(id),
                owner VARCHAR(255) NOT NULL,
                quantity INTEGER NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL,
                request_date TIMESTAMPTZ NOT NULL,
                processed_date TIMESTAMPTZ,
                refund_amount NUMERIC(12, 2) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id UUID PRIMARY KEY,
                book_id UUID NOT NULL REFERENCES books(id),
                author VARCHAR(255) NOT NULL,
                rating INTEGER NOT NULL,
                title VARCHAR(255),
                comment TEXT,
                is_verified_purchase BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT rating_range CHECK (rating BETWEEN 1 AND 5),
                UNIQUE (book_id, author)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema migration")?;
        }

        Ok(())
    }

    /// Seed the sample catalog and discount codes if the catalog is empty
    pub async fn seed_sample_data(&self) -> Result<()> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        if count.0 > 0 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for (id, name) in seed::sample_categories() {
            sqlx::query("INSERT INTO categories (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(id)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        for (book, categories) in seed::sample_books() {
            sqlx::query(
                r#"
                INSERT INTO books (id, title, author, price, stock)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(book.id)
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.price)
            .bind(book.stock)
            .execute(&mut *tx)
            .await?;

            for category in categories {
                sqlx::query(
                    "INSERT INTO book_categories (book_id, category_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(book.id)
                .bind(category)
                .execute(&mut *tx)
                .await?;
            }
        }

        for discount in seed::sample_discounts(Utc::now()) {
            sqlx::query(&format!("{} ON CONFLICT (code) DO NOTHING", INSERT_DISCOUNT))
                .bind(discount.id)
                .bind(&discount.code)
                .bind(&discount.description)
                .bind(discount.discount_type)
                .bind(discount.discount_value)
                .bind(discount.valid_from)
                .bind(discount.valid_to)
                .bind(discount.min_order_amount)
                .bind(discount.max_discount)
                .bind(discount.usage_limit)
                .bind(discount.used_count)
                .bind(discount.is_active)
                .bind(discount.created_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

// =============================================================================
// COLUMN LISTS
// =============================================================================
// Entities map through #[derive(FromRow)]; status columns through the
// sqlx::Type derives in models.rs.

const BOOK_COLUMNS: &str = "b.id, b.title, b.author, b.price, b.stock";

const DISCOUNT_COLUMNS: &str = "id, code, description, discount_type, discount_value, \
     valid_from, valid_to, min_order_amount, max_discount, usage_limit, used_count, \
     is_active, created_at";

const INSERT_DISCOUNT: &str = r#"
    INSERT INTO discount_codes (id, code, description, discount_type, discount_value,
        valid_from, valid_to, min_order_amount, max_discount, usage_limit, used_count,
        is_active, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#;

const ORDER_COLUMNS: &str = "id, order_number, owner, order_date, status, payment_status, \
     original_amount, discount_amount, total_amount, applied_discount_code, shipping_address, \
     billing_address, customer_email, customer_phone, delivered_date, cancelled_date";

const RETURN_COLUMNS: &str = "id, return_number, order_id, book_id, owner, quantity, reason, \
     status, request_date, processed_date, refund_amount";

fn status_texts(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

// =============================================================================
// UNIT OF WORK
// =============================================================================

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    // -------------------------------------------------------------------------
    // BOOKS
    // -------------------------------------------------------------------------
    async fn get_book(&mut self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books b WHERE b.id = $1",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(book)
    }

    async fn list_in_stock_books(&mut self, exclude: &[Uuid], limit: i64) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(&format!(
            r#"
            SELECT {} FROM books b
            WHERE b.stock > 0 AND NOT (b.id = ANY($1))
            ORDER BY b.title ASC, b.id ASC
            LIMIT $2
            "#,
            BOOK_COLUMNS
        ))
        .bind(exclude)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(books)
    }

    async fn list_in_stock_books_in_categories(
        &mut self,
        categories: &[Uuid],
        exclude: &[Uuid],
        limit: i64,
    ) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(&format!(
            r#"
            SELECT {} FROM books b
            WHERE b.stock > 0
              AND NOT (b.id = ANY($2))
              AND EXISTS (
                  SELECT 1 FROM book_categories bc
                  WHERE bc.book_id = b.id AND bc.category_id = ANY($1)
              )
            ORDER BY b.title ASC, b.id ASC
            LIMIT $3
            "#,
            BOOK_COLUMNS
        ))
        .bind(categories)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(books)
    }

    async fn categories_of_books(&mut self, book_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT DISTINCT category_id FROM book_categories WHERE book_id = ANY($1) ORDER BY category_id",
        )
        .bind(book_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| row.try_get("category_id").map_err(AppError::from))
            .collect()
    }

    async fn decrement_stock(&mut self, book_id: Uuid, quantity: i32) -> AppResult<bool> {
        // The WHERE clause is re-evaluated after a concurrent writer commits,
        // so the loser of a race for the last unit sees 0 rows affected.
        let result = sqlx::query(
            r#"
            UPDATE books
            SET stock = stock - $1
            WHERE id = $2 AND stock >= $1
            "#,
        )
        .bind(quantity)
        .bind(book_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // -------------------------------------------------------------------------
    // DISCOUNT CODES
    // -------------------------------------------------------------------------
    async fn find_discount_by_code(&mut self, code: &str) -> AppResult<Option<DiscountCode>> {
        let discount = sqlx::query_as::<_, DiscountCode>(&format!(
            "SELECT {} FROM discount_codes WHERE code = $1",
            DISCOUNT_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(discount)
    }

    async fn get_discount(&mut self, id: Uuid) -> AppResult<Option<DiscountCode>> {
        let discount = sqlx::query_as::<_, DiscountCode>(&format!(
            "SELECT {} FROM discount_codes WHERE id = $1",
            DISCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(discount)
    }

    async fn list_discounts(&mut self) -> AppResult<Vec<DiscountCode>> {
        let discounts = sqlx::query_as::<_, DiscountCode>(&format!(
            "SELECT {} FROM discount_codes ORDER BY code ASC",
            DISCOUNT_COLUMNS
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(discounts)
    }

    async fn insert_discount(&mut self, discount: &DiscountCode) -> AppResult<()> {
        let result = sqlx::query(INSERT_DISCOUNT)
            .bind(discount.id)
            .bind(&discount.code)
            .bind(&discount.description)
            .bind(discount.discount_type)
            .bind(discount.discount_value)
            .bind(discount.valid_from)
            .bind(discount.valid_to)
            .bind(discount.min_order_amount)
            .bind(discount.max_discount)
            .bind(discount.usage_limit)
            .bind(discount.used_count)
            .bind(discount.is_active)
            .bind(discount.created_at)
            .execute(&mut *self.tx)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(
                AppError::bad_request(format!("Discount code '{}' already exists", discount.code)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_discount_active(&mut self, id: Uuid, active: bool) -> AppResult<()> {
        sqlx::query("UPDATE discount_codes SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn redeem_discount(&mut self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discount_codes
            SET used_count = used_count + 1
            WHERE id = $1 AND (usage_limit IS NULL OR used_count < usage_limit)
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_active_cart(&mut self, owner: &str) -> AppResult<Option<Cart>> {
        // Row lock serializes concurrent edits of the same cart
        let cart = sqlx::query_as::<_, Cart>(
            r#"
            SELECT id, owner, status, created_at FROM carts
            WHERE owner = $1 AND status = 'ACTIVE'
            FOR UPDATE
            "#,
        )
        .bind(owner)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(cart)
    }

    async fn insert_active_cart(&mut self, cart: &Cart) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO carts (id, owner, status, created_at)
            VALUES ($1, $2, 'ACTIVE', $3)
            ON CONFLICT (owner) WHERE status = 'ACTIVE' DO NOTHING
            "#,
        )
        .bind(cart.id)
        .bind(&cart.owner)
        .bind(cart.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_cart_status(&mut self, cart_id: Uuid, status: CartStatus) -> AppResult<()> {
        sqlx::query("UPDATE carts SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(
            "SELECT id, cart_id, book_id, quantity, created_at FROM cart_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(item)
    }

    async fn get_cart(&mut self, id: Uuid) -> AppResult<Option<Cart>> {
        let cart = sqlx::query_as::<_, Cart>(
            "SELECT id, owner, status, created_at FROM carts WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(cart)
    }

    async fn find_cart_item(&mut self, cart_id: Uuid, book_id: Uuid) -> AppResult<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, cart_id, book_id, quantity, created_at FROM cart_items
            WHERE cart_id = $1 AND book_id = $2
            "#,
        )
        .bind(cart_id)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(item)
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, cart_id, book_id, quantity, created_at FROM cart_items
            WHERE cart_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(items)
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (id, cart_id, book_id, quantity, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(item.id)
        .bind(item.cart_id)
        .bind(item.book_id)
        .bind(item.quantity)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_cart_item_quantity(&mut self, id: Uuid, quantity: i32) -> AppResult<()> {
        sqlx::query("UPDATE cart_items SET quantity = $1 WHERE id = $2")
            .bind(quantity)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_cart_items(&mut self, cart_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            ORDER_COLUMNS
        ))
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.owner)
        .bind(order.order_date)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.original_amount)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(order.applied_discount_code)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.customer_email)
        .bind(&order.customer_phone)
        .bind(order.delivered_date)
        .bind(order.cancelled_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, book_id, quantity, unit_price, total_price)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.book_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.total_price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(order)
    }

    async fn list_orders_for_owner(&mut self, owner: &str) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE owner = $1 ORDER BY order_date DESC",
            ORDER_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(orders)
    }

    async fn find_order_item(&mut self, order_id: Uuid, book_id: Uuid) -> AppResult<Option<OrderItem>> {
        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, order_id, book_id, quantity, unit_price, total_price
            FROM order_items WHERE order_id = $1 AND book_id = $2
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(item)
    }

    async fn purchased_book_ids(&mut self, owner: &str) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT oi.book_id FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.owner = $1
            ORDER BY oi.book_id
            "#,
        )
        .bind(owner)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| row.try_get("book_id").map_err(AppError::from))
            .collect()
    }

    async fn owner_has_order_line(
        &mut self,
        owner: &str,
        book_id: Uuid,
        statuses: &[OrderStatus],
    ) -> AppResult<bool> {
        let found: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM order_items oi
                JOIN orders o ON o.id = oi.order_id
                WHERE o.owner = $1 AND oi.book_id = $2 AND o.status = ANY($3)
            )
            "#,
        )
        .bind(owner)
        .bind(book_id)
        .bind(status_texts(statuses))
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(found.0)
    }

    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        delivered_date: Option<DateTime<Utc>>,
        cancelled_date: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $1,
                delivered_date = COALESCE($2, delivered_date),
                cancelled_date = COALESCE($3, cancelled_date)
            WHERE id = $4
            "#,
        )
        .bind(status)
        .bind(delivered_date)
        .bind(cancelled_date)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // RETURNS & REVIEWS
    // -------------------------------------------------------------------------
    async fn insert_return(&mut self, request: &ReturnRequest) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO return_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            RETURN_COLUMNS
        ))
        .bind(request.id)
        .bind(&request.return_number)
        .bind(request.order_id)
        .bind(request.book_id)
        .bind(&request.owner)
        .bind(request.quantity)
        .bind(&request.reason)
        .bind(request.status)
        .bind(request.request_date)
        .bind(request.processed_date)
        .bind(request.refund_amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_return(&mut self, id: Uuid) -> AppResult<Option<ReturnRequest>> {
        let request = sqlx::query_as::<_, ReturnRequest>(&format!(
            "SELECT {} FROM return_requests WHERE id = $1 FOR UPDATE",
            RETURN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(request)
    }

    async fn update_return_status(
        &mut self,
        id: Uuid,
        status: ReturnStatus,
        processed_date: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE return_requests
            SET status = $1, processed_date = COALESCE(processed_date, $2)
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(processed_date)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_review(&mut self, author: &str, book_id: Uuid) -> AppResult<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            SELECT id, book_id, author, rating, title, comment, is_verified_purchase, created_at
            FROM reviews WHERE author = $1 AND book_id = $2
            "#,
        )
        .bind(author)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(review)
    }

    async fn insert_review(&mut self, review: &Review) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (id, book_id, author, rating, title, comment, is_verified_purchase, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(review.id)
        .bind(review.book_id)
        .bind(&review.author)
        .bind(review.rating)
        .bind(&review.title)
        .bind(&review.comment)
        .bind(review.is_verified_purchase)
        .bind(review.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(AppError::bad_request("You have already reviewed this book"))
            }
            Err(err) => Err(err.into()),
        }
    }

    // -------------------------------------------------------------------------
    // COMPLETION
    // -------------------------------------------------------------------------
    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
