// =============================================================================
// REVIEWS
// =============================================================================
// One review per user and book. A review is marked as a verified purchase
// when the author has an order line for the book in a confirmed, shipped or
// delivered order.
// =============================================================================

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::Principal;
use crate::catalog::get_book_in;
use crate::error::{AppError, AppResult};
use crate::models::{OrderStatus, Review, SubmitReviewRequest};
use crate::store::{Store, UnitOfWork};

const MSG_ALREADY_REVIEWED: &str = "You have already reviewed this book";

fn purchase_statuses() -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(OrderStatus::counts_as_purchase)
        .collect()
}

async fn is_verified_purchase(
    uow: &mut dyn UnitOfWork,
    owner: &str,
    book_id: Uuid,
) -> AppResult<bool> {
    uow.owner_has_order_line(owner, book_id, &purchase_statuses())
        .await
}

/// Whole numbers 1 to 5 only
fn parse_rating(rating: f64) -> AppResult<i32> {
    if rating.fract() != 0.0 || !(1.0..=5.0).contains(&rating) {
        return Err(AppError::bad_request("Rating must be between 1 and 5"));
    }
    Ok(rating as i32)
}

/// `submitReview`. Returns the stored review and the confirmation message.
pub async fn submit_review(
    store: &dyn Store,
    principal: &Principal,
    request: &SubmitReviewRequest,
    now: DateTime<Utc>,
) -> AppResult<(Review, String)> {
    let (Some(book_id), Some(rating)) = (request.book_id, request.rating) else {
        return Err(AppError::bad_request("Book ID and rating are required"));
    };
    let rating = parse_rating(rating)?;

    let mut uow = store.begin().await?;
    let book = get_book_in(&mut *uow, book_id).await?;

    if uow.find_review(&principal.user_id, book_id).await?.is_some() {
        return Err(AppError::bad_request(MSG_ALREADY_REVIEWED));
    }

    let review = Review {
        id: Uuid::new_v4(),
        book_id,
        author: principal.user_id.clone(),
        rating,
        title: request.title.clone(),
        comment: request.comment.clone(),
        is_verified_purchase: is_verified_purchase(&mut *uow, &principal.user_id, book_id).await?,
        created_at: now,
    };
    uow.insert_review(&review).await?;
    uow.commit().await?;

    tracing::info!(
        book_id = %book_id,
        user = %principal.user_id,
        rating,
        verified = review.is_verified_purchase,
        "Review submitted"
    );

    let message = format!("Review submitted successfully for \"{}\"", book.title);
    Ok((review, message))
}

/// `canReview`: not yet reviewed, and bought in a counted order
pub async fn can_review(store: &dyn Store, principal: &Principal, book_id: Uuid) -> AppResult<bool> {
    let mut uow = store.begin().await?;
    if uow.find_review(&principal.user_id, book_id).await?.is_some() {
        return Ok(false);
    }
    is_verified_purchase(&mut *uow, &principal.user_id, book_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{Book, OrderContact, PurchaseItem, PurchaseRequest};
    use crate::orders::purchase_books;
    use rust_decimal::Decimal;

    async fn store_with_book() -> (MemoryStore, Book) {
        let store = MemoryStore::new();
        let book = Book {
            id: Uuid::new_v4(),
            title: "Foundation".into(),
            author: "Isaac Asimov".into(),
            price: Decimal::new(1650, 2),
            stock: 3,
        };
        store.put_book(book.clone(), vec![]).await;
        (store, book)
    }

    fn review(book: &Book, rating: f64) -> SubmitReviewRequest {
        SubmitReviewRequest {
            book_id: Some(book.id),
            rating: Some(rating),
            title: Some("Classic".into()),
            comment: None,
        }
    }

    #[test]
    fn test_rating_must_be_whole_and_in_range() {
        for bad in [0.0, 6.0, 4.5, -1.0, f64::NAN] {
            assert!(parse_rating(bad).is_err(), "{} accepted", bad);
        }
        assert_eq!(parse_rating(1.0).unwrap(), 1);
        assert_eq!(parse_rating(5.0).unwrap(), 5);
    }

    #[test]
    fn test_purchase_statuses() {
        assert_eq!(
            purchase_statuses(),
            vec![OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered]
        );
    }

    #[tokio::test]
    async fn test_one_review_per_book() {
        let (store, book) = store_with_book().await;
        let alice = Principal::customer("alice");

        let (stored, message) = submit_review(&store, &alice, &review(&book, 4.0), Utc::now())
            .await
            .unwrap();
        assert_eq!(message, "Review submitted successfully for \"Foundation\"");
        assert_eq!(stored.rating, 4);
        assert!(!stored.is_verified_purchase);

        let err = submit_review(&store, &alice, &review(&book, 5.0), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), MSG_ALREADY_REVIEWED);

        // someone else may still review it
        assert!(submit_review(&store, &Principal::customer("bob"), &review(&book, 2.0), Utc::now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_book_and_missing_rating() {
        let (store, book) = store_with_book().await;
        let alice = Principal::customer("alice");

        let unknown = SubmitReviewRequest {
            book_id: Some(Uuid::new_v4()),
            ..review(&book, 3.0)
        };
        assert!(matches!(
            submit_review(&store, &alice, &unknown, Utc::now()).await,
            Err(AppError::NotFound(_))
        ));

        let no_rating = SubmitReviewRequest {
            rating: None,
            ..review(&book, 3.0)
        };
        let err = submit_review(&store, &alice, &no_rating, Utc::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Book ID and rating are required");
    }

    #[tokio::test]
    async fn test_verified_purchase_follows_order_status() {
        let (store, book) = store_with_book().await;
        let alice = Principal::customer("alice");
        let request = PurchaseRequest {
            items: vec![PurchaseItem { book_id: book.id, quantity: 1 }],
            discount_code: None,
            contact: OrderContact::default(),
        };
        let placed = purchase_books(&store, &alice, &request, Utc::now()).await.unwrap();

        // a PENDING order does not count yet
        assert!(!can_review(&store, &alice, book.id).await.unwrap());

        let mut order = placed.order.clone();
        order.status = OrderStatus::Shipped;
        store.put_order(order).await;
        assert!(can_review(&store, &alice, book.id).await.unwrap());

        let (stored, _) = submit_review(&store, &alice, &review(&book, 5.0), Utc::now())
            .await
            .unwrap();
        assert!(stored.is_verified_purchase);
        assert!(!can_review(&store, &alice, book.id).await.unwrap());
    }
}
