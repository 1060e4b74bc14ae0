// =============================================================================
// RECOMMENDATIONS
// =============================================================================
// Up to ten in-stock books:
//   - no purchases yet:   general in-stock listing
//   - otherwise:          books sharing a category with past purchases,
//                         minus what was already bought
//   - no category match:  general in-stock listing again
// Ordering is by title, then id, in both stores.
// =============================================================================

use crate::auth::Principal;
use crate::error::AppResult;
use crate::models::Book;
use crate::store::Store;

pub const RECOMMENDATION_LIMIT: i64 = 10;

pub async fn get_recommendations(store: &dyn Store, principal: &Principal) -> AppResult<Vec<Book>> {
    let mut uow = store.begin().await?;

    let purchased = uow.purchased_book_ids(&principal.user_id).await?;
    if purchased.is_empty() {
        return uow.list_in_stock_books(&[], RECOMMENDATION_LIMIT).await;
    }

    let categories = uow.categories_of_books(&purchased).await?;
    if !categories.is_empty() {
        let related = uow
            .list_in_stock_books_in_categories(&categories, &purchased, RECOMMENDATION_LIMIT)
            .await?;
        if !related.is_empty() {
            return Ok(related);
        }
    }

    tracing::debug!(user = %principal.user_id, "No category matches, using general listing");
    uow.list_in_stock_books(&[], RECOMMENDATION_LIMIT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{OrderContact, PurchaseItem, PurchaseRequest};
    use crate::orders::purchase_books;
    use crate::seed::{sample_books, seed_memory_store};
    use chrono::Utc;
    use uuid::Uuid;

    fn book_id(title: &str) -> Uuid {
        sample_books()
            .into_iter()
            .find(|(b, _)| b.title == title)
            .map(|(b, _)| b.id)
            .unwrap()
    }

    async fn buy(store: &MemoryStore, user: &Principal, title: &str) {
        let request = PurchaseRequest {
            items: vec![PurchaseItem { book_id: book_id(title), quantity: 1 }],
            discount_code: None,
            contact: OrderContact::default(),
        };
        purchase_books(store, user, &request, Utc::now()).await.unwrap();
    }

    fn titles(books: &[Book]) -> Vec<&str> {
        books.iter().map(|b| b.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_new_customer_gets_in_stock_listing() {
        let store = MemoryStore::new();
        seed_memory_store(&store).await;

        let books = get_recommendations(&store, &Principal::customer("new")).await.unwrap();
        assert_eq!(books.len(), 7);
        assert!(books.iter().all(|b| b.stock > 0));
        assert!(!titles(&books).contains(&"Catweazle"));
    }

    #[tokio::test]
    async fn test_recommends_by_category_excluding_purchases() {
        let store = MemoryStore::new();
        seed_memory_store(&store).await;
        let alice = Principal::customer("alice");

        buy(&store, &alice, "Foundation").await;

        let books = get_recommendations(&store, &alice).await.unwrap();
        assert_eq!(titles(&books), vec!["Dune"]);
    }

    #[tokio::test]
    async fn test_falls_back_when_category_is_exhausted() {
        let store = MemoryStore::new();
        seed_memory_store(&store).await;
        let alice = Principal::customer("alice");

        buy(&store, &alice, "SPQR").await;

        let books = get_recommendations(&store, &alice).await.unwrap();
        assert_eq!(books.len(), 7);
    }
}
