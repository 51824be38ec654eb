/*!
 * Pricing lock management for quotes.
 *
 * A manager takes an exclusive, time-limited lock on a quote before pricing
 * it. Every grant, refresh and release is a single conditional UPDATE whose
 * `rows_affected` decides the outcome, so two managers racing for the same
 * quote can never both win regardless of how many API instances are running.
 */

use crate::{
    db::DbPool,
    entities::quote::{self, Entity as QuoteEntity, QuoteStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// How long a pricing lock lasts before another manager may take over.
pub const LOCK_TTL_MINUTES: i64 = 30;

/// Read-only view of a quote's lock from one manager's perspective
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub is_locked: bool,
    pub is_locked_by_me: bool,
    pub is_expired: bool,
    /// Locked by someone else but past its expiry, so an acquire would
    /// succeed
    pub can_take_over: bool,
}

impl LockStatus {
    pub fn of(quote: &quote::Model, manager_id: Uuid, now: DateTime<Utc>) -> Self {
        let is_locked = quote.locked_by.is_some();
        let is_locked_by_me = quote.is_held_by(manager_id);
        let is_expired = quote.lock_is_expired(now);

        Self {
            is_locked,
            is_locked_by_me,
            is_expired,
            can_take_over: is_locked && !is_locked_by_me && is_expired,
        }
    }
}

/// Service guarding exclusive pricing access to quotes
#[derive(Clone)]
pub struct QuoteLockService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl QuoteLockService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Acquire or refresh the pricing lock on a quote.
    ///
    /// Succeeds when the quote is in a pricing stage and the lock is free,
    /// already ours, or expired. The holder's own acquire extends the expiry.
    #[instrument(skip(self), fields(quote_id = %quote_id, manager_id = %manager_id))]
    pub async fn acquire(
        &self,
        quote_id: Uuid,
        manager_id: Uuid,
    ) -> Result<quote::Model, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();
        let expires_at = now + Duration::minutes(LOCK_TTL_MINUTES);

        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::LockedBy, Expr::value(manager_id))
            .col_expr(quote::Column::LockedAt, Expr::value(now))
            .col_expr(quote::Column::LockExpiresAt, Expr::value(expires_at))
            .col_expr(quote::Column::Status, Expr::value(QuoteStatus::InPricing))
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(
                quote::Column::Status
                    .is_in([QuoteStatus::PendingPricing, QuoteStatus::InPricing]),
            )
            .filter(
                Condition::any()
                    .add(quote::Column::LockedBy.is_null())
                    .add(quote::Column::LockedBy.eq(manager_id))
                    .add(quote::Column::LockExpiresAt.lt(now)),
            )
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, quote_id = %quote_id, "Failed to run lock acquisition update");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(self.classify_acquire_failure(quote_id, manager_id, now).await);
        }

        let locked = QuoteEntity::find_by_id(quote_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", quote_id)))?;

        info!(quote_id = %quote_id, manager_id = %manager_id, expires_at = %expires_at, "Pricing lock acquired");

        if let Err(e) = self
            .event_sender
            .send(Event::QuoteLocked {
                quote_id,
                manager_id,
            })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote locked event");
        }

        Ok(locked)
    }

    /// Explain why the conditional acquire matched no rows.
    async fn classify_acquire_failure(
        &self,
        quote_id: Uuid,
        manager_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceError {
        let quote = match QuoteEntity::find_by_id(quote_id).one(&*self.db_pool).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return ServiceError::NotFound(format!("Quote {} not found", quote_id)),
            Err(e) => return ServiceError::DatabaseError(e),
        };

        if !quote.status.allows_locking() {
            return ServiceError::Conflict(format!(
                "Quote {} cannot be priced while in status {}",
                quote_id, quote.status
            ));
        }

        match (quote.locked_by, quote.lock_expires_at) {
            (Some(holder), Some(expires_at)) if holder != manager_id && expires_at >= now => {
                ServiceError::Conflict(format!(
                    "Quote {} is locked by manager {} until {}",
                    quote_id, holder, expires_at
                ))
            }
            // The row changed between the update and this read; the caller
            // can simply retry.
            _ => ServiceError::Conflict(format!(
                "Quote {} lock was contended, please retry",
                quote_id
            )),
        }
    }

    /// Release the pricing lock, returning the quote to the pricing queue.
    ///
    /// Only the current holder may release; an expired lock still belongs to
    /// its holder until reaped or taken over.
    #[instrument(skip(self), fields(quote_id = %quote_id, manager_id = %manager_id))]
    pub async fn release(&self, quote_id: Uuid, manager_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::LockedBy, Expr::value(Option::<Uuid>::None))
            .col_expr(
                quote::Column::LockedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                quote::Column::LockExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                quote::Column::Status,
                Expr::value(QuoteStatus::PendingPricing),
            )
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(QuoteStatus::InPricing))
            .filter(quote::Column::LockedBy.eq(manager_id))
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, quote_id = %quote_id, "Failed to run lock release update");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(self.classify_release_failure(quote_id, manager_id).await);
        }

        info!(quote_id = %quote_id, manager_id = %manager_id, "Pricing lock released");

        if let Err(e) = self
            .event_sender
            .send(Event::QuoteLockReleased {
                quote_id,
                manager_id,
            })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send lock released event");
        }

        Ok(())
    }

    async fn classify_release_failure(&self, quote_id: Uuid, manager_id: Uuid) -> ServiceError {
        let quote = match QuoteEntity::find_by_id(quote_id).one(&*self.db_pool).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return ServiceError::NotFound(format!("Quote {} not found", quote_id)),
            Err(e) => return ServiceError::DatabaseError(e),
        };

        match quote.locked_by {
            Some(holder) if holder != manager_id => ServiceError::Forbidden(format!(
                "Pricing lock on quote {} is held by manager {}",
                quote_id, holder
            )),
            _ => ServiceError::Forbidden(format!(
                "Manager {} does not hold the pricing lock on quote {}",
                manager_id, quote_id
            )),
        }
    }

    /// Report the lock state of a quote without mutating anything.
    #[instrument(skip(self), fields(quote_id = %quote_id, manager_id = %manager_id))]
    pub async fn lock_status(
        &self,
        quote_id: Uuid,
        manager_id: Uuid,
    ) -> Result<LockStatus, ServiceError> {
        let quote = QuoteEntity::find_by_id(quote_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", quote_id)))?;

        Ok(LockStatus::of(&quote, manager_id, Utc::now()))
    }

    /// Reset every quote whose pricing lock has expired back to the pricing
    /// queue. Returns how many quotes were reset; running it again
    /// immediately finds nothing to do.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_locks(&self) -> Result<u64, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::LockedBy, Expr::value(Option::<Uuid>::None))
            .col_expr(
                quote::Column::LockedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                quote::Column::LockExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                quote::Column::Status,
                Expr::value(QuoteStatus::PendingPricing),
            )
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Status.eq(QuoteStatus::InPricing))
            .filter(quote::Column::LockExpiresAt.lt(now))
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to run expired lock cleanup");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected > 0 {
            info!(
                released = result.rows_affected,
                "Released expired pricing locks"
            );

            if let Err(e) = self
                .event_sender
                .send(Event::ExpiredLocksReleased {
                    count: result.rows_affected,
                    timestamp: now,
                })
                .await
            {
                warn!(error = %e, "Failed to send expired locks released event");
            }
        }

        Ok(result.rows_affected)
    }
}
