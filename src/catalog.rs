// =============================================================================
// CATALOG READER
// =============================================================================
// Read-only book lookups. Inside a unit of work the result is authoritative
// for price and stock; nothing here caches across units of work.
// =============================================================================

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Book;
use crate::store::{Store, UnitOfWork};

pub fn book_not_found(id: Uuid) -> AppError {
    AppError::not_found(format!("Book with ID {} not found", id))
}

/// `getBook` within an open unit of work
pub async fn get_book_in(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Book> {
    uow.get_book(id).await?.ok_or_else(|| book_not_found(id))
}

/// `getBook` as a standalone read
pub async fn get_book(store: &dyn Store, id: Uuid) -> AppResult<Book> {
    let mut uow = store.begin().await?;
    get_book_in(&mut *uow, id).await
}

/// `Insufficient stock for book "Dune". Available: 1, Requested: 2`
pub fn insufficient_stock(book: &Book, requested: i32) -> AppError {
    AppError::bad_request(format!(
        "Insufficient stock for book \"{}\". Available: {}, Requested: {}",
        book.title, book.stock, requested
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_get_book_and_not_found() {
        let store = MemoryStore::new();
        let book = Book {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            price: Decimal::new(1999, 2),
            stock: 5,
        };
        store.put_book(book.clone(), vec![]).await;

        assert_eq!(get_book(&store, book.id).await.unwrap(), book);

        let missing = Uuid::new_v4();
        match get_book(&store, missing).await {
            Err(AppError::NotFound(msg)) => assert!(msg.contains(&missing.to_string())),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_insufficient_stock_names_title_and_quantity() {
        let book = Book {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            author: String::new(),
            price: Decimal::ONE,
            stock: 1,
        };
        let err = insufficient_stock(&book, 3);
        assert_eq!(
            err.to_string(),
            "Insufficient stock for book \"Dune\". Available: 1, Requested: 3"
        );
    }
}
