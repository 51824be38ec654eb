/*!
 * Quote lifecycle management.
 *
 * A quote starts as a client's item wishlist, passes through manager pricing
 * under an exclusive lock, and ends approved, rejected or converted into an
 * order. Every transition is a conditional UPDATE guarded by the expected
 * current status, so concurrent writers cannot push a quote through the same
 * edge twice.
 */

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::order::{self, OrderStatus, PaymentStatus},
    entities::product,
    entities::quote::{self, Entity as QuoteEntity, QuoteStatus},
    entities::quote_item,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderResponse,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// How long manager pricing stays open for client review.
pub const PRICING_VALIDITY_DAYS: i64 = 7;

/// How long an approved quote stays convertible into an order.
pub const APPROVAL_VALIDITY_DAYS: i64 = 30;

/// Subtotal of a single quote line.
pub fn line_subtotal(quantity: i32, unit_price: Decimal) -> Decimal {
    Decimal::from(quantity) * unit_price
}

/// Request/Response types for the quote service

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateQuoteRequest {
    #[validate(length(max = 2000, message = "Sourcing notes are too long"))]
    pub sourcing_notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReplaceItemsRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<QuoteItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricedItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SetPricingRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<PricedItemInput>,
    #[validate(length(max = 2000, message = "Sourcing notes are too long"))]
    pub sourcing_notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConvertQuoteRequest {
    #[validate(length(min = 10, message = "A valid shipping address is required"))]
    pub shipping_address: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl From<quote_item::Model> for QuoteItemResponse {
    fn from(item: quote_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub status: String,
    pub total_amount: Decimal,
    pub sourcing_notes: Option<String>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<QuoteItemResponse>,
}

impl QuoteResponse {
    fn from_parts(quote: quote::Model, items: Vec<quote_item::Model>) -> Self {
        Self {
            id: quote.id,
            client_id: quote.client_id,
            manager_id: quote.manager_id,
            status: quote.status.to_string(),
            total_amount: quote.total_amount,
            sourcing_notes: quote.sourcing_notes,
            locked_by: quote.locked_by,
            locked_at: quote.locked_at,
            lock_expires_at: quote.lock_expires_at,
            valid_until: quote.valid_until,
            created_at: quote.created_at,
            updated_at: quote.updated_at,
            items: items.into_iter().map(QuoteItemResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteSummary {
    pub id: Uuid,
    pub client_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub status: String,
    pub total_amount: Decimal,
    pub locked_by: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<quote::Model> for QuoteSummary {
    fn from(quote: quote::Model) -> Self {
        Self {
            id: quote.id,
            client_id: quote.client_id,
            manager_id: quote.manager_id,
            status: quote.status.to_string(),
            total_amount: quote.total_amount,
            locked_by: quote.locked_by,
            lock_expires_at: quote.lock_expires_at,
            valid_until: quote.valid_until,
            created_at: quote.created_at,
            updated_at: quote.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteListResponse {
    pub quotes: Vec<QuoteSummary>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing quotes through their lifecycle
#[derive(Clone)]
pub struct QuoteService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl QuoteService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an empty quote owned by the calling client
    #[instrument(skip(self, request), fields(client_id = %caller.user_id))]
    pub async fn create_quote(
        &self,
        caller: &AuthUser,
        request: CreateQuoteRequest,
    ) -> Result<QuoteResponse, ServiceError> {
        request.validate()?;

        if !caller.is_client() {
            return Err(ServiceError::Forbidden(
                "Only clients can create quotes".to_string(),
            ));
        }

        let now = Utc::now();
        let quote_id = Uuid::new_v4();

        let model = quote::ActiveModel {
            id: Set(quote_id),
            client_id: Set(caller.user_id),
            manager_id: Set(None),
            status: Set(QuoteStatus::PendingItems),
            total_amount: Set(Decimal::ZERO),
            sourcing_notes: Set(request.sourcing_notes),
            locked_by: Set(None),
            locked_at: Set(None),
            lock_expires_at: Set(None),
            valid_until: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, quote_id = %quote_id, "Failed to create quote");
            ServiceError::DatabaseError(e)
        })?;

        info!(quote_id = %quote_id, client_id = %caller.user_id, "Quote created");

        if let Err(e) = self
            .event_sender
            .send(Event::QuoteCreated {
                quote_id,
                client_id: caller.user_id,
            })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote created event");
        }

        Ok(QuoteResponse::from_parts(model, Vec::new()))
    }

    /// Fetch one quote with its items.
    ///
    /// Clients only see their own quotes; a foreign quote reads as absent.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<QuoteResponse, ServiceError> {
        let db = &*self.db_pool;
        let quote = self.find_visible_quote(quote_id, caller).await?;

        let items = quote_item::Entity::find()
            .filter(quote_item::Column::QuoteId.eq(quote_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(QuoteResponse::from_parts(quote, items))
    }

    /// Lists quotes with pagination, scoped to the caller's role
    #[instrument(skip(self))]
    pub async fn list_quotes(
        &self,
        caller: &AuthUser,
        status: Option<QuoteStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<QuoteListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = QuoteEntity::find();
        if caller.is_client() {
            query = query.filter(quote::Column::ClientId.eq(caller.user_id));
        } else if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Agents have no access to quotes".to_string(),
            ));
        }
        if let Some(status) = status {
            query = query.filter(quote::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(quote::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let quotes = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(QuoteListResponse {
            quotes: quotes.into_iter().map(QuoteSummary::from).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Replace the entire item list of a quote that is still collecting
    /// items. Quantities are recorded unpriced; totals stay zero until a
    /// manager prices the quote.
    #[instrument(skip(self, request), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn replace_items(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
        request: ReplaceItemsRequest,
    ) -> Result<QuoteResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let quote = self.find_owned_quote(quote_id, caller).await?;

        if quote.status != QuoteStatus::PendingItems {
            return Err(ServiceError::Conflict(format!(
                "Quote items can only be changed while the quote is in status PENDING_ITEMS; quote {} is currently {}",
                quote_id, quote.status
            )));
        }

        let lines: Vec<(Uuid, i32, Decimal)> = request
            .items
            .iter()
            .map(|item| (item.product_id, item.quantity, Decimal::ZERO))
            .collect();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        self.check_products_exist(&txn, &lines).await?;
        let total = replace_item_rows(&txn, quote_id, &lines).await?;

        let now = Utc::now();
        let updated = quote::ActiveModel {
            id: Set(quote_id),
            total_amount: Set(total),
            updated_at: Set(now),
            ..Default::default()
        }
        .update(&txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let items = quote_item::Entity::find()
            .filter(quote_item::Column::QuoteId.eq(quote_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(quote_id = %quote_id, item_count = items.len(), "Quote items replaced");

        Ok(QuoteResponse::from_parts(updated, items))
    }

    /// Submit a quote for pricing. Requires at least one item.
    #[instrument(skip(self), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn submit_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<QuoteResponse, ServiceError> {
        let db = &*self.db_pool;
        let quote = self.find_owned_quote(quote_id, caller).await?;

        if quote.status != QuoteStatus::PendingItems {
            return Err(ServiceError::Conflict(format!(
                "Quote {} cannot be submitted while in status {}",
                quote_id, quote.status
            )));
        }

        let item_count = quote_item::Entity::find()
            .filter(quote_item::Column::QuoteId.eq(quote_id))
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if item_count == 0 {
            return Err(ServiceError::InvalidInput(
                "Quote must have at least one item".to_string(),
            ));
        }

        self.transition(
            quote_id,
            QuoteStatus::PendingItems,
            QuoteStatus::PendingPricing,
        )
        .await?;

        info!(quote_id = %quote_id, "Quote submitted for pricing");

        if let Err(e) = self
            .event_sender
            .send(Event::QuoteSubmitted {
                quote_id,
                client_id: caller.user_id,
            })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote submitted event");
        }

        self.response_for(quote_id).await
    }

    /// Record manager pricing for a locked quote.
    ///
    /// Requires the caller to hold a live pricing lock; the item list is
    /// replaced wholesale with the priced lines, the lock is cleared and the
    /// quote moves to client review with a seven-day validity window.
    #[instrument(skip(self, request), fields(quote_id = %quote_id, manager_id = %caller.user_id))]
    pub async fn set_pricing(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
        request: SetPricingRequest,
    ) -> Result<QuoteResponse, ServiceError> {
        request.validate()?;

        if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Only managers can price quotes".to_string(),
            ));
        }
        for item in &request.items {
            if item.quantity < 1 {
                return Err(ServiceError::InvalidInput(
                    "Item quantity must be at least 1".to_string(),
                ));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(ServiceError::InvalidInput(
                    "Unit price must be positive".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let valid_until = now + Duration::days(PRICING_VALIDITY_DAYS);

        let lines: Vec<(Uuid, i32, Decimal)> = request
            .items
            .iter()
            .map(|item| (item.product_id, item.quantity, item.unit_price))
            .collect();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        self.check_products_exist(&txn, &lines).await?;
        let total: Decimal = lines
            .iter()
            .map(|(_, quantity, unit_price)| line_subtotal(*quantity, *unit_price))
            .sum();

        // The lock is re-validated here, inside the transaction, closing the
        // race between lock grant and pricing submission. Items are replaced
        // only once the guarded status flip has gone through.
        let mut update = QuoteEntity::update_many()
            .col_expr(
                quote::Column::Status,
                Expr::value(QuoteStatus::AwaitingClientApproval),
            )
            .col_expr(quote::Column::ManagerId, Expr::value(caller.user_id))
            .col_expr(quote::Column::TotalAmount, Expr::value(total))
            .col_expr(quote::Column::ValidUntil, Expr::value(valid_until))
            .col_expr(quote::Column::LockedBy, Expr::value(Option::<Uuid>::None))
            .col_expr(
                quote::Column::LockedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                quote::Column::LockExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(quote::Column::UpdatedAt, Expr::value(now));
        if let Some(notes) = &request.sourcing_notes {
            update = update.col_expr(quote::Column::SourcingNotes, Expr::value(notes.clone()));
        }
        let result = update
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(QuoteStatus::InPricing))
            .filter(quote::Column::LockedBy.eq(caller.user_id))
            .filter(quote::Column::LockExpiresAt.gte(now))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            return Err(self.classify_pricing_failure(quote_id, caller.user_id).await);
        }

        replace_item_rows(&txn, quote_id, &lines).await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(quote_id = %quote_id, manager_id = %caller.user_id, total = %total, "Quote priced and sent for client approval");

        if let Err(e) = self
            .event_sender
            .send(Event::QuotePriced {
                quote_id,
                manager_id: caller.user_id,
                total_amount: total,
            })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote priced event");
        }

        self.response_for(quote_id).await
    }

    async fn classify_pricing_failure(&self, quote_id: Uuid, manager_id: Uuid) -> ServiceError {
        let quote = match QuoteEntity::find_by_id(quote_id).one(&*self.db_pool).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return ServiceError::NotFound(format!("Quote {} not found", quote_id)),
            Err(e) => return ServiceError::DatabaseError(e),
        };

        if quote.status != QuoteStatus::InPricing {
            return ServiceError::Conflict(format!(
                "Quote {} is not being priced; it is currently {}",
                quote_id, quote.status
            ));
        }

        match quote.locked_by {
            Some(holder) if holder != manager_id => ServiceError::Conflict(format!(
                "Quote {} is locked by manager {}",
                quote_id, holder
            )),
            Some(_) => ServiceError::Conflict(format!(
                "Pricing lock on quote {} has expired; reacquire it before submitting prices",
                quote_id
            )),
            None => ServiceError::Conflict(format!(
                "No pricing lock is held on quote {}",
                quote_id
            )),
        }
    }

    /// Approve priced work, opening a thirty-day conversion window.
    #[instrument(skip(self), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn approve_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<QuoteResponse, ServiceError> {
        let quote = self.find_owned_quote(quote_id, caller).await?;

        if quote.status != QuoteStatus::AwaitingClientApproval {
            return Err(ServiceError::Conflict(format!(
                "Quote {} cannot be approved while in status {}",
                quote_id, quote.status
            )));
        }

        let now = Utc::now();
        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::Status, Expr::value(QuoteStatus::Approved))
            .col_expr(
                quote::Column::ValidUntil,
                Expr::value(now + Duration::days(APPROVAL_VALIDITY_DAYS)),
            )
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(QuoteStatus::AwaitingClientApproval))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(self.conflict_with_fresh_status(quote_id, "approved").await);
        }

        info!(quote_id = %quote_id, "Quote approved by client");

        if let Err(e) = self.event_sender.send(Event::QuoteApproved { quote_id }).await {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote approved event");
        }

        self.response_for(quote_id).await
    }

    /// Reject priced work. Terminal.
    #[instrument(skip(self), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn reject_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<QuoteResponse, ServiceError> {
        let quote = self.find_owned_quote(quote_id, caller).await?;

        if quote.status != QuoteStatus::AwaitingClientApproval {
            return Err(ServiceError::Conflict(format!(
                "Quote {} cannot be rejected while in status {}",
                quote_id, quote.status
            )));
        }

        let now = Utc::now();
        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::Status, Expr::value(QuoteStatus::Rejected))
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(QuoteStatus::AwaitingClientApproval))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(self.conflict_with_fresh_status(quote_id, "rejected").await);
        }

        info!(quote_id = %quote_id, "Quote rejected by client");

        if let Err(e) = self.event_sender.send(Event::QuoteRejected { quote_id }).await {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote rejected event");
        }

        self.response_for(quote_id).await
    }

    /// Convert an approved quote into an order, atomically.
    ///
    /// The same guard that blocks double conversion also excludes the expiry
    /// sweep: only one of them can win the conditional status flip.
    #[instrument(skip(self, request), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn convert_to_order(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
        request: ConvertQuoteRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let quote = self.find_owned_quote(quote_id, caller).await?;

        if quote.status != QuoteStatus::Approved {
            return Err(ServiceError::Conflict(format!(
                "Quote {} cannot be converted while in status {}",
                quote_id, quote.status
            )));
        }

        let now = Utc::now();
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let result = QuoteEntity::update_many()
            .col_expr(
                quote::Column::Status,
                Expr::value(QuoteStatus::ConvertedToOrder),
            )
            .col_expr(quote::Column::UpdatedAt, Expr::value(now))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(QuoteStatus::Approved))
            .filter(quote::Column::ValidUntil.gte(now))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            return Err(self.classify_conversion_failure(quote_id, now).await);
        }

        let items = quote_item::Entity::find()
            .filter(quote_item::Column::QuoteId.eq(quote_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now)),
            quote_id: Set(quote_id),
            client_id: Set(quote.client_id),
            status: Set(OrderStatus::PendingPayment),
            payment_status: Set(PaymentStatus::Pending),
            total_amount: Set(quote.total_amount),
            shipping_address: Set(request.shipping_address.trim().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, quote_id = %quote_id, "Failed to create order from quote");
            ServiceError::DatabaseError(e)
        })?;

        let order_items: Vec<crate::entities::order_item::ActiveModel> = items
            .iter()
            .map(|item| crate::entities::order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.subtotal),
            })
            .collect();

        crate::entities::order_item::Entity::insert_many(order_items)
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(quote_id = %quote_id, order_id = %order_id, "Quote converted to order");

        if let Err(e) = self
            .event_sender
            .send(Event::QuoteConverted { quote_id, order_id })
            .await
        {
            warn!(error = %e, quote_id = %quote_id, "Failed to send quote converted event");
        }

        Ok(OrderResponse::from(order_model))
    }

    async fn classify_conversion_failure(&self, quote_id: Uuid, now: DateTime<Utc>) -> ServiceError {
        let quote = match QuoteEntity::find_by_id(quote_id).one(&*self.db_pool).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return ServiceError::NotFound(format!("Quote {} not found", quote_id)),
            Err(e) => return ServiceError::DatabaseError(e),
        };

        if quote.status == QuoteStatus::Approved {
            if let Some(valid_until) = quote.valid_until {
                if valid_until < now {
                    return ServiceError::Conflict(format!(
                        "Approval of quote {} expired at {}; it can no longer be converted",
                        quote_id, valid_until
                    ));
                }
            }
        }

        ServiceError::Conflict(format!(
            "Quote {} cannot be converted while in status {}",
            quote_id, quote.status
        ))
    }

    /// Delete a quote that has not yet been approved and is not locked.
    #[instrument(skip(self), fields(quote_id = %quote_id, client_id = %caller.user_id))]
    pub async fn delete_quote(&self, quote_id: Uuid, caller: &AuthUser) -> Result<(), ServiceError> {
        let quote = self.find_owned_quote(quote_id, caller).await?;
        let now = Utc::now();

        if quote.lock_is_live(now) {
            return Err(ServiceError::Conflict(format!(
                "Quote {} is locked for pricing and cannot be deleted",
                quote_id
            )));
        }
        if !quote.status.allows_deletion() {
            return Err(ServiceError::Conflict(format!(
                "Quote {} cannot be deleted while in status {}",
                quote_id, quote.status
            )));
        }

        // Items go with the quote via the cascading foreign key.
        QuoteEntity::delete_by_id(quote_id)
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(quote_id = %quote_id, "Quote deleted");
        Ok(())
    }

    /// Flip approved quotes whose validity lapsed to REJECTED.
    ///
    /// Each quote is flipped with the same conditional guard conversion
    /// uses, so a quote being converted concurrently is skipped. Returns the
    /// number of quotes expired.
    #[instrument(skip(self))]
    pub async fn expire_approved_quotes(&self) -> Result<u64, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let expired_ids: Vec<Uuid> = QuoteEntity::find()
            .filter(quote::Column::Status.eq(QuoteStatus::Approved))
            .filter(quote::Column::ValidUntil.lt(now))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .into_iter()
            .map(|quote| quote.id)
            .collect();

        let mut flipped = 0u64;
        for quote_id in expired_ids {
            let result = QuoteEntity::update_many()
                .col_expr(quote::Column::Status, Expr::value(QuoteStatus::Rejected))
                .col_expr(quote::Column::UpdatedAt, Expr::value(now))
                .filter(quote::Column::Id.eq(quote_id))
                .filter(quote::Column::Status.eq(QuoteStatus::Approved))
                .filter(quote::Column::ValidUntil.lt(now))
                .exec(db)
                .await
                .map_err(ServiceError::DatabaseError)?;

            if result.rows_affected == 1 {
                flipped += 1;
                if let Err(e) = self.event_sender.send(Event::QuoteExpired { quote_id }).await {
                    warn!(error = %e, quote_id = %quote_id, "Failed to send quote expired event");
                }
            }
        }

        if flipped > 0 {
            info!(expired = flipped, "Expired approved quotes were rejected");
        }

        Ok(flipped)
    }

    // Shared lookups and guards

    /// Fetch a quote the caller may read. Clients see only their own quotes.
    async fn find_visible_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<quote::Model, ServiceError> {
        let quote = QuoteEntity::find_by_id(quote_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", quote_id)))?;

        if caller.is_client() && quote.client_id != caller.user_id {
            return Err(ServiceError::NotFound(format!(
                "Quote {} not found",
                quote_id
            )));
        }
        if caller.is_agent() {
            return Err(ServiceError::Forbidden(
                "Agents have no access to quotes".to_string(),
            ));
        }

        Ok(quote)
    }

    /// Fetch a quote for a client-side transition; the caller must be the
    /// owning client.
    async fn find_owned_quote(
        &self,
        quote_id: Uuid,
        caller: &AuthUser,
    ) -> Result<quote::Model, ServiceError> {
        let quote = QuoteEntity::find_by_id(quote_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", quote_id)))?;

        if !caller.is_client() || quote.client_id != caller.user_id {
            return Err(ServiceError::Forbidden(format!(
                "Quote {} belongs to another client",
                quote_id
            )));
        }

        Ok(quote)
    }

    async fn transition(
        &self,
        quote_id: Uuid,
        from: QuoteStatus,
        to: QuoteStatus,
    ) -> Result<(), ServiceError> {
        let result = QuoteEntity::update_many()
            .col_expr(quote::Column::Status, Expr::value(to))
            .col_expr(quote::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(quote::Column::Id.eq(quote_id))
            .filter(quote::Column::Status.eq(from))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(self.conflict_with_fresh_status(quote_id, "updated").await);
        }

        Ok(())
    }

    async fn conflict_with_fresh_status(&self, quote_id: Uuid, action: &str) -> ServiceError {
        match QuoteEntity::find_by_id(quote_id).one(&*self.db_pool).await {
            Ok(Some(quote)) => ServiceError::Conflict(format!(
                "Quote {} cannot be {} while in status {}",
                quote_id, action, quote.status
            )),
            Ok(None) => ServiceError::NotFound(format!("Quote {} not found", quote_id)),
            Err(e) => ServiceError::DatabaseError(e),
        }
    }

    async fn check_products_exist<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[(Uuid, i32, Decimal)],
    ) -> Result<(), ServiceError> {
        for (_, quantity, _) in lines {
            if *quantity < 1 {
                return Err(ServiceError::InvalidInput(
                    "Item quantity must be at least 1".to_string(),
                ));
            }
        }

        let product_ids: Vec<Uuid> = lines.iter().map(|(id, _, _)| *id).collect();
        let found = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .filter(product::Column::IsActive.eq(true))
            .all(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        for product_id in &product_ids {
            if !found.iter().any(|p| p.id == *product_id) {
                return Err(ServiceError::InvalidInput(format!(
                    "Unknown or inactive product {}",
                    product_id
                )));
            }
        }

        Ok(())
    }

    async fn response_for(&self, quote_id: Uuid) -> Result<QuoteResponse, ServiceError> {
        let db = &*self.db_pool;
        let quote = QuoteEntity::find_by_id(quote_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", quote_id)))?;

        let items = quote_item::Entity::find()
            .filter(quote_item::Column::QuoteId.eq(quote_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(QuoteResponse::from_parts(quote, items))
    }
}

/// Delete-all-and-recreate item replacement shared by client submission and
/// manager pricing. Returns the new total.
async fn replace_item_rows<C: ConnectionTrait>(
    conn: &C,
    quote_id: Uuid,
    lines: &[(Uuid, i32, Decimal)],
) -> Result<Decimal, ServiceError> {
    quote_item::Entity::delete_many()
        .filter(quote_item::Column::QuoteId.eq(quote_id))
        .exec(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let mut total = Decimal::ZERO;
    let rows: Vec<quote_item::ActiveModel> = lines
        .iter()
        .map(|(product_id, quantity, unit_price)| {
            let subtotal = line_subtotal(*quantity, *unit_price);
            total += subtotal;
            quote_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                quote_id: Set(quote_id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                subtotal: Set(subtotal),
            }
        })
        .collect();

    quote_item::Entity::insert_many(rows)
        .exec(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    Ok(total)
}

fn generate_order_number(now: DateTime<Utc>) -> String {
    format!(
        "SO-{}-{:06}",
        now.format("%Y%m%d"),
        rand::thread_rng().gen_range(0..1_000_000)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_subtotal_multiplies_quantity_by_price() {
        assert_eq!(line_subtotal(2, dec!(5000)), dec!(10000));
        assert_eq!(line_subtotal(1, dec!(19.99)), dec!(19.99));
        assert_eq!(line_subtotal(3, dec!(0.10)), dec!(0.30));
    }

    #[test]
    fn unpriced_lines_contribute_nothing() {
        assert_eq!(line_subtotal(250, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn order_numbers_carry_the_date() {
        let now = Utc::now();
        let number = generate_order_number(now);
        assert!(number.starts_with(&format!("SO-{}", now.format("%Y%m%d"))));
        assert_eq!(number.len(), "SO-YYYYMMDD-NNNNNN".len());
    }
}
