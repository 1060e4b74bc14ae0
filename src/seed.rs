// =============================================================================
// SAMPLE DATA
// =============================================================================
// Catalog and discount codes used for local runs. Ids are fixed so the
// same book ids work against both storage backends.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::memory::MemoryStore;
use crate::models::{Book, DiscountCode, DiscountType};

const FICTION: Uuid = Uuid::from_u128(0x0c00_0000_0000_0000_0000_0000_0000_0001);
const SCIENCE_FICTION: Uuid = Uuid::from_u128(0x0c00_0000_0000_0000_0000_0000_0000_0002);
const HISTORY: Uuid = Uuid::from_u128(0x0c00_0000_0000_0000_0000_0000_0000_0003);
const PROGRAMMING: Uuid = Uuid::from_u128(0x0c00_0000_0000_0000_0000_0000_0000_0004);

pub fn sample_categories() -> Vec<(Uuid, &'static str)> {
    vec![
        (FICTION, "Fiction"),
        (SCIENCE_FICTION, "Science Fiction"),
        (HISTORY, "History"),
        (PROGRAMMING, "Programming"),
    ]
}

pub fn sample_books() -> Vec<(Book, Vec<Uuid>)> {
    let rows: [(u128, &str, &str, i64, i32, &[Uuid]); 8] = [
        (1, "Wuthering Heights", "Emily Brontë", 1199, 12, &[FICTION]),
        (2, "Jane Eyre", "Charlotte Brontë", 1299, 11, &[FICTION]),
        (3, "The Raven", "Edgar Allan Poe", 1399, 333, &[FICTION]),
        (4, "Dune", "Frank Herbert", 1999, 5, &[FICTION, SCIENCE_FICTION]),
        (5, "Foundation", "Isaac Asimov", 1650, 20, &[SCIENCE_FICTION]),
        (6, "SPQR", "Mary Beard", 2450, 8, &[HISTORY]),
        (7, "The Rust Programming Language", "Steve Klabnik", 3999, 40, &[PROGRAMMING]),
        (8, "Catweazle", "Richard Carpenter", 1500, 0, &[FICTION]),
    ];

    rows.iter()
        .map(|(n, title, author, cents, stock, categories)| {
            (
                Book {
                    id: Uuid::from_u128(0x0b00_0000_0000_0000_0000_0000_0000_0000 + n),
                    title: title.to_string(),
                    author: author.to_string(),
                    price: Decimal::new(*cents, 2),
                    stock: *stock,
                },
                categories.to_vec(),
            )
        })
        .collect()
}

/// SAVE10: 10% off orders of $25+, capped at $50. WELCOME5: $5 off, 100 uses.
pub fn sample_discounts(now: DateTime<Utc>) -> Vec<DiscountCode> {
    vec![
        DiscountCode {
            id: Uuid::from_u128(0x0d00_0000_0000_0000_0000_0000_0000_0001),
            code: "SAVE10".to_string(),
            description: Some("10% off orders over $25".to_string()),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::new(10, 0),
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(365),
            min_order_amount: Decimal::new(25, 0),
            max_discount: Some(Decimal::new(50, 0)),
            usage_limit: None,
            used_count: 0,
            is_active: true,
            created_at: now,
        },
        DiscountCode {
            id: Uuid::from_u128(0x0d00_0000_0000_0000_0000_0000_0000_0002),
            code: "WELCOME5".to_string(),
            description: Some("$5 off your first order".to_string()),
            discount_type: DiscountType::FixedAmount,
            discount_value: Decimal::new(5, 0),
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(90),
            min_order_amount: Decimal::ZERO,
            max_discount: None,
            usage_limit: Some(100),
            used_count: 0,
            is_active: true,
            created_at: now,
        },
    ]
}

pub async fn seed_memory_store(store: &MemoryStore) {
    for (book, categories) in sample_books() {
        store.put_book(book, categories).await;
    }
    for discount in sample_discounts(Utc::now()) {
        store.put_discount(discount).await;
    }
}
