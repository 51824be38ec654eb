/*!
 * Delivery assignment and the three-way handoff handshake.
 *
 * A manager assigns a paid order to an agent, which mints a sealed
 * verification code addressed to the client. The agent walks the delivery
 * through pickup and transit, the client proves receipt by presenting the
 * code, and a manager closes the loop. Order status follows the delivery at
 * both ends of the journey.
 */

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::delivery::{self, DeliveryStatus, Entity as DeliveryEntity},
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    entities::user::{self, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
    services::codes::{self, CodeKey, DeliveryCodePayload},
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignDeliveryRequest {
    pub order_id: Uuid,
    pub agent_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateDeliveryStatusRequest {
    /// Requested status, e.g. "PICKED_UP".
    pub status: String,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    #[validate(length(max = 2000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyDeliveryRequest {
    #[validate(length(min = 1, message = "Verification code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShortCodeResponse {
    pub delivery_id: Uuid,
    pub short_code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub agent_id: Uuid,
    pub status: String,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub notes: Option<String>,
    pub client_verified_at: Option<DateTime<Utc>>,
    pub manager_confirmed_at: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<delivery::Model> for DeliveryResponse {
    // The sealed code is deliberately absent; it reaches the client only
    // through the assignment notification.
    fn from(delivery: delivery::Model) -> Self {
        Self {
            id: delivery.id,
            order_id: delivery.order_id,
            agent_id: delivery.agent_id,
            status: delivery.status.to_string(),
            current_lat: delivery.current_lat,
            current_lng: delivery.current_lng,
            notes: delivery.notes,
            client_verified_at: delivery.client_verified_at,
            manager_confirmed_at: delivery.manager_confirmed_at,
            actual_delivery: delivery.actual_delivery,
            created_at: delivery.created_at,
            updated_at: delivery.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryListResponse {
    pub deliveries: Vec<DeliveryResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing delivery assignment, progress and verification
#[derive(Clone)]
pub struct DeliveryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    code_key: CodeKey,
}

impl DeliveryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, code_key: CodeKey) -> Self {
        Self {
            db_pool,
            event_sender,
            code_key,
        }
    }

    /// Assign a paid order to a delivery agent.
    ///
    /// Creates the delivery with a freshly sealed verification code and moves
    /// the order to IN_TRANSIT in the same transaction.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, caller_id = %caller.user_id))]
    pub async fn assign_delivery(
        &self,
        caller: &AuthUser,
        request: AssignDeliveryRequest,
    ) -> Result<DeliveryResponse, ServiceError> {
        if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Only managers can assign deliveries".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", request.order_id))
            })?;

        if !order.payment_confirmed() {
            return Err(ServiceError::Conflict(format!(
                "Order {} has no confirmed payment",
                order.id
            )));
        }

        let existing = DeliveryEntity::find()
            .filter(delivery::Column::OrderId.eq(order.id))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a delivery assigned",
                order.id
            )));
        }

        let agent = user::Entity::find_by_id(request.agent_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let agent = match agent {
            Some(user) if user.role == UserRole::Agent && user.active => user,
            _ => {
                return Err(ServiceError::InvalidInput(format!(
                    "User {} is not an active delivery agent",
                    request.agent_id
                )))
            }
        };

        let now = Utc::now();
        let delivery_id = Uuid::new_v4();
        let payload = DeliveryCodePayload::new(delivery_id, order.id, order.client_id);
        let sealed_code = codes::seal(&payload, &self.code_key)?;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let model = delivery::ActiveModel {
            id: Set(delivery_id),
            order_id: Set(order.id),
            agent_id: Set(agent.id),
            status: Set(DeliveryStatus::Assigned),
            delivery_code: Set(sealed_code.clone()),
            code_generated_at: Set(payload.issued_at),
            current_lat: Set(None),
            current_lng: Set(None),
            notes: Set(None),
            client_verified_at: Set(None),
            client_verified_by: Set(None),
            manager_confirmed_at: Set(None),
            manager_confirmed_by: Set(None),
            actual_delivery: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to create delivery");
            ServiceError::DatabaseError(e)
        })?;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::InTransit))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            return Err(ServiceError::Conflict(format!(
                "Order {} is not ready for delivery assignment",
                order.id
            )));
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            delivery_id = %delivery_id,
            order_id = %order.id,
            agent_id = %agent.id,
            "Delivery assigned"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::DeliveryAssigned {
                delivery_id,
                order_id: order.id,
                client_id: order.client_id,
                agent_id: agent.id,
                verification_code: sealed_code,
            })
            .await
        {
            warn!(error = %e, delivery_id = %delivery_id, "Failed to send delivery assigned event");
        }

        Ok(DeliveryResponse::from(model))
    }

    /// Agent progress report. Only the assigned agent may move the delivery,
    /// and only one step forward at a time.
    #[instrument(skip(self, request), fields(delivery_id = %delivery_id, caller_id = %caller.user_id))]
    pub async fn update_status(
        &self,
        delivery_id: Uuid,
        caller: &AuthUser,
        request: UpdateDeliveryStatusRequest,
    ) -> Result<DeliveryResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let delivery = self.find_delivery(delivery_id).await?;

        if !caller.is_agent() || delivery.agent_id != caller.user_id {
            return Err(ServiceError::Forbidden(format!(
                "Delivery {} is assigned to another agent",
                delivery_id
            )));
        }

        let next = DeliveryStatus::from_str(&request.status).map_err(|_| {
            ServiceError::InvalidInput(format!("Unknown delivery status {}", request.status))
        })?;
        if !next.is_agent_target() {
            return Err(ServiceError::InvalidInput(format!(
                "Agents cannot report status {}",
                next
            )));
        }
        if !delivery.status.agent_can_advance_to(next) {
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot move from {} to {}",
                delivery_id, delivery.status, next
            )));
        }

        let now = Utc::now();
        let mut update = DeliveryEntity::update_many()
            .col_expr(delivery::Column::Status, Expr::value(next))
            .col_expr(delivery::Column::UpdatedAt, Expr::value(now));
        if next == DeliveryStatus::Delivered {
            update = update.col_expr(delivery::Column::ActualDelivery, Expr::value(now));
        }
        if let Some(lat) = request.current_lat {
            update = update.col_expr(delivery::Column::CurrentLat, Expr::value(lat));
        }
        if let Some(lng) = request.current_lng {
            update = update.col_expr(delivery::Column::CurrentLng, Expr::value(lng));
        }
        if let Some(notes) = &request.notes {
            update = update.col_expr(delivery::Column::Notes, Expr::value(notes.clone()));
        }

        let result = update
            .filter(delivery::Column::Id.eq(delivery_id))
            .filter(delivery::Column::Status.eq(delivery.status))
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            // Lost a race with another report; surface the fresh status.
            let fresh = self.find_delivery(delivery_id).await?;
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot move from {} to {}",
                delivery_id, fresh.status, next
            )));
        }

        info!(
            delivery_id = %delivery_id,
            from = %delivery.status,
            to = %next,
            "Delivery status updated"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::DeliveryStatusChanged {
                delivery_id,
                old_status: delivery.status.to_string(),
                new_status: next.to_string(),
            })
            .await
        {
            warn!(error = %e, delivery_id = %delivery_id, "Failed to send delivery status event");
        }

        let fresh = self.find_delivery(delivery_id).await?;
        Ok(DeliveryResponse::from(fresh))
    }

    /// Client receipt confirmation against the sealed verification code.
    ///
    /// The presented code must match the stored one byte for byte, decrypt
    /// under the server key, address this exact delivery, and still be inside
    /// its validity window. Any failure leaves the delivery untouched.
    #[instrument(skip(self, request), fields(delivery_id = %delivery_id, client_id = %caller.user_id))]
    pub async fn verify_by_client(
        &self,
        delivery_id: Uuid,
        caller: &AuthUser,
        request: VerifyDeliveryRequest,
    ) -> Result<DeliveryResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let delivery = self.find_delivery(delivery_id).await?;

        let order = OrderEntity::find_by_id(delivery.order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", delivery.order_id))
            })?;

        if !caller.is_client() || order.client_id != caller.user_id {
            return Err(ServiceError::Forbidden(format!(
                "Delivery {} belongs to another client",
                delivery_id
            )));
        }

        if delivery.status != DeliveryStatus::Delivered {
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot be verified while in status {}",
                delivery_id, delivery.status
            )));
        }
        if delivery.client_verified_at.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Delivery {} is already verified",
                delivery_id
            )));
        }

        if request.code != delivery.delivery_code {
            return Err(ServiceError::InvalidCode(
                "Verification code does not match".to_string(),
            ));
        }

        let payload = codes::open(&delivery.delivery_code, &self.code_key)?;
        if payload.delivery_id != delivery.id
            || payload.order_id != delivery.order_id
            || payload.client_id != order.client_id
        {
            return Err(ServiceError::InvalidCode(
                "Verification code does not match this delivery".to_string(),
            ));
        }

        let now = Utc::now();
        if payload.is_expired(now) {
            return Err(ServiceError::InvalidCode(
                "Verification code has expired".to_string(),
            ));
        }

        let result = DeliveryEntity::update_many()
            .col_expr(
                delivery::Column::Status,
                Expr::value(DeliveryStatus::ClientVerified),
            )
            .col_expr(delivery::Column::ClientVerifiedAt, Expr::value(now))
            .col_expr(
                delivery::Column::ClientVerifiedBy,
                Expr::value(caller.user_id),
            )
            .col_expr(delivery::Column::UpdatedAt, Expr::value(now))
            .filter(delivery::Column::Id.eq(delivery_id))
            .filter(delivery::Column::Status.eq(DeliveryStatus::Delivered))
            .filter(delivery::Column::ClientVerifiedAt.is_null())
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            let fresh = self.find_delivery(delivery_id).await?;
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot be verified while in status {}",
                delivery_id, fresh.status
            )));
        }

        info!(delivery_id = %delivery_id, "Delivery verified by client");

        if let Err(e) = self
            .event_sender
            .send(Event::DeliveryClientVerified {
                delivery_id,
                client_id: caller.user_id,
            })
            .await
        {
            warn!(error = %e, delivery_id = %delivery_id, "Failed to send client verified event");
        }

        let fresh = self.find_delivery(delivery_id).await?;
        Ok(DeliveryResponse::from(fresh))
    }

    /// Manager close-out of a client-verified delivery. Single use; flips the
    /// order to DELIVERED in the same transaction.
    #[instrument(skip(self), fields(delivery_id = %delivery_id, manager_id = %caller.user_id))]
    pub async fn confirm_by_manager(
        &self,
        delivery_id: Uuid,
        caller: &AuthUser,
    ) -> Result<DeliveryResponse, ServiceError> {
        if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Only managers can confirm deliveries".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let delivery = self.find_delivery(delivery_id).await?;

        if delivery.status != DeliveryStatus::ClientVerified {
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot be confirmed while in status {}",
                delivery_id, delivery.status
            )));
        }

        let now = Utc::now();
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let result = DeliveryEntity::update_many()
            .col_expr(
                delivery::Column::Status,
                Expr::value(DeliveryStatus::ManagerConfirmed),
            )
            .col_expr(delivery::Column::ManagerConfirmedAt, Expr::value(now))
            .col_expr(
                delivery::Column::ManagerConfirmedBy,
                Expr::value(caller.user_id),
            )
            .col_expr(delivery::Column::UpdatedAt, Expr::value(now))
            .filter(delivery::Column::Id.eq(delivery_id))
            .filter(delivery::Column::Status.eq(DeliveryStatus::ClientVerified))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            let fresh = self.find_delivery(delivery_id).await?;
            return Err(ServiceError::Conflict(format!(
                "Delivery {} cannot be confirmed while in status {}",
                delivery_id, fresh.status
            )));
        }

        OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Delivered))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(delivery.order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            delivery_id = %delivery_id,
            order_id = %delivery.order_id,
            "Delivery confirmed by manager"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::DeliveryManagerConfirmed {
                delivery_id,
                order_id: delivery.order_id,
                manager_id: caller.user_id,
            })
            .await
        {
            warn!(error = %e, delivery_id = %delivery_id, "Failed to send manager confirmed event");
        }

        let fresh = self.find_delivery(delivery_id).await?;
        Ok(DeliveryResponse::from(fresh))
    }

    /// Spoken confirmation digits for the assigned agent. Derived from the
    /// delivery and order ids, so it carries no secret material.
    #[instrument(skip(self), fields(delivery_id = %delivery_id, caller_id = %caller.user_id))]
    pub async fn short_code(
        &self,
        delivery_id: Uuid,
        caller: &AuthUser,
    ) -> Result<ShortCodeResponse, ServiceError> {
        let delivery = self.find_delivery(delivery_id).await?;

        if !caller.is_agent() || delivery.agent_id != caller.user_id {
            return Err(ServiceError::Forbidden(format!(
                "Delivery {} is assigned to another agent",
                delivery_id
            )));
        }

        Ok(ShortCodeResponse {
            delivery_id,
            short_code: codes::short_code(delivery.id, delivery.order_id),
        })
    }

    /// Fetch one delivery under role scoping: agents see their assignments,
    /// clients the deliveries of their own orders, managers everything.
    #[instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn get_delivery(
        &self,
        delivery_id: Uuid,
        caller: &AuthUser,
    ) -> Result<DeliveryResponse, ServiceError> {
        let delivery = self.find_delivery(delivery_id).await?;

        if caller.has_manager_access() {
            return Ok(DeliveryResponse::from(delivery));
        }
        if caller.is_agent() {
            if delivery.agent_id == caller.user_id {
                return Ok(DeliveryResponse::from(delivery));
            }
            return Err(ServiceError::NotFound(format!(
                "Delivery {} not found",
                delivery_id
            )));
        }

        let order = OrderEntity::find_by_id(delivery.order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;
        match order {
            Some(order) if order.client_id == caller.user_id => {
                Ok(DeliveryResponse::from(delivery))
            }
            _ => Err(ServiceError::NotFound(format!(
                "Delivery {} not found",
                delivery_id
            ))),
        }
    }

    /// Lists deliveries with pagination, scoped to the caller's role
    #[instrument(skip(self))]
    pub async fn list_deliveries(
        &self,
        caller: &AuthUser,
        status: Option<DeliveryStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<DeliveryListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = DeliveryEntity::find();
        if caller.is_agent() {
            query = query.filter(delivery::Column::AgentId.eq(caller.user_id));
        } else if caller.is_client() {
            let order_ids: Vec<Uuid> = OrderEntity::find()
                .filter(order::Column::ClientId.eq(caller.user_id))
                .all(db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .into_iter()
                .map(|order| order.id)
                .collect();
            query = query.filter(delivery::Column::OrderId.is_in(order_ids));
        }
        if let Some(status) = status {
            query = query.filter(delivery::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(delivery::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let deliveries = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(DeliveryListResponse {
            deliveries: deliveries.into_iter().map(DeliveryResponse::from).collect(),
            total,
            page,
            per_page,
        })
    }

    async fn find_delivery(&self, delivery_id: Uuid) -> Result<delivery::Model, ServiceError> {
        DeliveryEntity::find_by_id(delivery_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Delivery {} not found", delivery_id)))
    }
}
