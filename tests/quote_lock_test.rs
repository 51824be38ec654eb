//! Exclusive pricing-lock semantics: acquisition, refresh, takeover of
//! expired locks, holder-only release, and the reaper sweep.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use supplyline_api::{
    entities::{
        quote::{self, Entity as QuoteEntity, QuoteStatus},
        user,
    },
    errors::ServiceError,
    services::quotes::{CreateQuoteRequest, QuoteItemInput, ReplaceItemsRequest},
};
use uuid::Uuid;

/// Walk a fresh quote through create -> items -> submit so it sits in
/// PENDING_PRICING, ready to be locked.
async fn submitted_quote(app: &TestApp, client: &user::Model, sku: &str) -> Uuid {
    let product = app.seed_product("Bath Towel", sku, "piece").await;
    let caller = app.auth_user(client);
    let quotes = &app.state.services.quotes;

    let created = quotes
        .create_quote(
            &caller,
            CreateQuoteRequest {
                sourcing_notes: None,
            },
        )
        .await
        .expect("create quote");

    quotes
        .replace_items(
            created.id,
            &caller,
            ReplaceItemsRequest {
                items: vec![QuoteItemInput {
                    product_id: product.id,
                    quantity: 5,
                }],
            },
        )
        .await
        .expect("add items");

    quotes
        .submit_quote(created.id, &caller)
        .await
        .expect("submit quote");

    created.id
}

/// Rewrite the lock expiry in the database so the lease looks stale.
async fn force_lock_expiry(app: &TestApp, quote_id: Uuid) {
    let past = Utc::now() - Duration::minutes(1);
    QuoteEntity::update_many()
        .col_expr(quote::Column::LockExpiresAt, Expr::value(past))
        .filter(quote::Column::Id.eq(quote_id))
        .exec(&*app.state.db)
        .await
        .expect("force lock expiry");
}

async fn fetch_quote(app: &TestApp, quote_id: Uuid) -> quote::Model {
    QuoteEntity::find_by_id(quote_id)
        .one(&*app.state.db)
        .await
        .expect("fetch quote")
        .expect("quote exists")
}

#[tokio::test]
async fn acquire_moves_the_quote_into_pricing_under_the_caller() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let manager = app.seed_manager("manager@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-ACQ-1").await;

    let locked = app
        .state
        .services
        .quote_locks
        .acquire(quote_id, manager.id)
        .await
        .expect("first acquire succeeds");

    assert_eq!(locked.status, QuoteStatus::InPricing);
    assert_eq!(locked.locked_by, Some(manager.id));
    assert!(locked.locked_at.is_some());
    let expires_at = locked.lock_expires_at.expect("lease has an expiry");
    assert!(expires_at > Utc::now() + Duration::minutes(25));
}

#[tokio::test]
async fn second_manager_is_refused_while_the_lease_is_live() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let first = app.seed_manager("first@locks.test").await;
    let second = app.seed_manager("second@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-EXCL-1").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(quote_id, first.id).await.expect("first wins");

    let err = locks
        .acquire(quote_id, second.id)
        .await
        .expect_err("second must be refused");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains(&first.id.to_string()));

    // The refusal must not have disturbed the original lease.
    let quote = fetch_quote(&app, quote_id).await;
    assert_eq!(quote.locked_by, Some(first.id));
}

#[tokio::test]
async fn holder_reacquire_extends_the_lease() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let manager = app.seed_manager("manager@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-EXT-1").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(quote_id, manager.id).await.expect("acquire");

    // Shrink the remaining lease, then refresh it.
    let soon = Utc::now() + Duration::minutes(2);
    QuoteEntity::update_many()
        .col_expr(quote::Column::LockExpiresAt, Expr::value(soon))
        .filter(quote::Column::Id.eq(quote_id))
        .exec(&*app.state.db)
        .await
        .expect("shrink lease");

    let refreshed = locks
        .acquire(quote_id, manager.id)
        .await
        .expect("holder refresh succeeds");

    let expires_at = refreshed.lock_expires_at.expect("lease has an expiry");
    assert!(expires_at > Utc::now() + Duration::minutes(25));
    assert_eq!(refreshed.locked_by, Some(manager.id));
}

#[tokio::test]
async fn expired_foreign_lease_can_be_taken_over() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let first = app.seed_manager("first@locks.test").await;
    let second = app.seed_manager("second@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-OVER-1").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(quote_id, first.id).await.expect("first wins");
    force_lock_expiry(&app, quote_id).await;

    let taken = locks
        .acquire(quote_id, second.id)
        .await
        .expect("takeover of expired lease succeeds");

    assert_eq!(taken.locked_by, Some(second.id));
    assert_eq!(taken.status, QuoteStatus::InPricing);
}

#[tokio::test]
async fn release_returns_the_quote_to_the_pricing_queue() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let manager = app.seed_manager("manager@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-REL-1").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(quote_id, manager.id).await.expect("acquire");
    locks
        .release(quote_id, manager.id)
        .await
        .expect("holder release succeeds");

    let quote = fetch_quote(&app, quote_id).await;
    assert_eq!(quote.status, QuoteStatus::PendingPricing);
    assert_eq!(quote.locked_by, None);
    assert_eq!(quote.locked_at, None);
    assert_eq!(quote.lock_expires_at, None);
}

#[tokio::test]
async fn release_by_a_non_holder_is_forbidden() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let holder = app.seed_manager("holder@locks.test").await;
    let other = app.seed_manager("other@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-NREL-1").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(quote_id, holder.id).await.expect("acquire");

    let err = locks
        .release(quote_id, other.id)
        .await
        .expect_err("non-holder release must fail");
    assert_matches!(err, ServiceError::Forbidden(ref msg) if msg.contains(&holder.id.to_string()));

    // Lock is untouched.
    let quote = fetch_quote(&app, quote_id).await;
    assert_eq!(quote.locked_by, Some(holder.id));
}

#[tokio::test]
async fn lock_status_reports_each_perspective() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let holder = app.seed_manager("holder@locks.test").await;
    let other = app.seed_manager("other@locks.test").await;
    let quote_id = submitted_quote(&app, &client, "LOCK-STAT-1").await;

    let locks = &app.state.services.quote_locks;

    let before = locks
        .lock_status(quote_id, holder.id)
        .await
        .expect("status of unlocked quote");
    assert!(!before.is_locked);
    assert!(!before.can_take_over);

    locks.acquire(quote_id, holder.id).await.expect("acquire");

    let mine = locks.lock_status(quote_id, holder.id).await.expect("mine");
    assert!(mine.is_locked && mine.is_locked_by_me && !mine.can_take_over);

    let theirs = locks.lock_status(quote_id, other.id).await.expect("theirs");
    assert!(theirs.is_locked && !theirs.is_locked_by_me);
    assert!(!theirs.can_take_over, "live lease is not a takeover candidate");

    force_lock_expiry(&app, quote_id).await;

    let stale = locks.lock_status(quote_id, other.id).await.expect("stale");
    assert!(stale.is_locked && stale.is_expired && stale.can_take_over);
}

#[tokio::test]
async fn cleanup_resets_only_expired_leases() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let manager = app.seed_manager("manager@locks.test").await;
    let stale_id = submitted_quote(&app, &client, "LOCK-CLEAN-1").await;
    let live_id = submitted_quote(&app, &client, "LOCK-CLEAN-2").await;

    let locks = &app.state.services.quote_locks;
    locks.acquire(stale_id, manager.id).await.expect("acquire");
    locks.acquire(live_id, manager.id).await.expect("acquire");
    force_lock_expiry(&app, stale_id).await;

    let released = locks.cleanup_expired_locks().await.expect("cleanup");
    assert_eq!(released, 1);

    let stale = fetch_quote(&app, stale_id).await;
    assert_eq!(stale.status, QuoteStatus::PendingPricing);
    assert_eq!(stale.locked_by, None);
    assert_eq!(stale.lock_expires_at, None);

    let live = fetch_quote(&app, live_id).await;
    assert_eq!(live.status, QuoteStatus::InPricing);
    assert_eq!(live.locked_by, Some(manager.id));

    // Immediately running the sweep again finds nothing.
    let again = locks.cleanup_expired_locks().await.expect("second cleanup");
    assert_eq!(again, 0);
}

#[tokio::test]
async fn quote_still_collecting_items_cannot_be_locked() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@locks.test").await;
    let manager = app.seed_manager("manager@locks.test").await;
    let caller = app.auth_user(&client);

    let created = app
        .state
        .services
        .quotes
        .create_quote(
            &caller,
            CreateQuoteRequest {
                sourcing_notes: None,
            },
        )
        .await
        .expect("create quote");

    let err = app
        .state
        .services
        .quote_locks
        .acquire(created.id, manager.id)
        .await
        .expect_err("unsubmitted quote is not lockable");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("PENDING_ITEMS"));
}

#[tokio::test]
async fn locking_a_missing_quote_is_not_found() {
    let app = TestApp::new().await;
    let manager = app.seed_manager("manager@locks.test").await;

    let err = app
        .state
        .services
        .quote_locks
        .acquire(Uuid::new_v4(), manager.id)
        .await
        .expect_err("missing quote");
    assert_matches!(err, ServiceError::NotFound(_));
}
