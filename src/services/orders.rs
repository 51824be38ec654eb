/*!
 * Order read paths and payment confirmation.
 *
 * Orders are born from quote conversion and never created directly. The only
 * mutation this service owns is the payment confirmation flip that makes an
 * order eligible for delivery assignment.
 */

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub quote_id: Uuid,
    pub client_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order::Model> for OrderResponse {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            quote_id: order.quote_id,
            client_id: order.client_id,
            status: order.status.to_string(),
            payment_status: order.payment_status.to_string(),
            total_amount: order.total_amount,
            shipping_address: order.shipping_address,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
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
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for reading orders and confirming payment
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Fetch one order; clients see only their own.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_visible_order(order_id, caller).await?;
        Ok(OrderResponse::from(order))
    }

    /// Lists orders with pagination, scoped to the caller's role
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        caller: &AuthUser,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = OrderEntity::find();
        if caller.is_client() {
            query = query.filter(order::Column::ClientId.eq(caller.user_id));
        } else if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Agents see orders through their assigned deliveries".to_string(),
            ));
        }
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(OrderResponse::from).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Line items of one order, under the same visibility rules as the order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn list_order_items(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<Vec<OrderItemResponse>, ServiceError> {
        let order = self.find_visible_order(order_id, caller).await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(items.into_iter().map(OrderItemResponse::from).collect())
    }

    /// Mark an order as paid. Admin only, one-shot.
    #[instrument(skip(self), fields(order_id = %order_id, admin_id = %caller.user_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        if !caller.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only administrators can confirm payment".to_string(),
            ));
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Confirmed),
            )
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(self.classify_payment_failure(order_id).await);
        }

        info!(order_id = %order_id, "Order payment confirmed");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPaymentConfirmed { order_id })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send payment confirmed event");
        }

        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(OrderResponse::from(order))
    }

    async fn classify_payment_failure(&self, order_id: Uuid) -> ServiceError {
        match OrderEntity::find_by_id(order_id).one(&*self.db_pool).await {
            Ok(Some(_)) => ServiceError::Conflict(format!(
                "Payment for order {} is already confirmed",
                order_id
            )),
            Ok(None) => ServiceError::NotFound(format!("Order {} not found", order_id)),
            Err(e) => ServiceError::DatabaseError(e),
        }
    }

    async fn find_visible_order(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if caller.is_client() && order.client_id != caller.user_id {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }
        if caller.is_agent() {
            return Err(ServiceError::Forbidden(
                "Agents see orders through their assigned deliveries".to_string(),
            ));
        }

        Ok(order)
    }
}
