use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::services::orders::{OrderItemResponse, OrderListResponse, OrderResponse};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, AppState, ListQuery};

fn parse_order_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("Unknown order status {}", raw)))
}

/// List orders with pagination and optional status filter
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Clients see their own orders; managers see all",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("status" = Option<String>, Query, description = "Filter by order status, e.g. PENDING_PAYMENT"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = OrderListResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(parse_order_status)
        .transpose()?;
    let result = state
        .services
        .orders
        .list_orders(&auth_user, status, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Get a single order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = OrderResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List the line items of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/items",
    summary = "List order items",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Items retrieved", body = Vec<OrderItemResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderItemResponse>>>, ServiceError> {
    let items = state
        .services
        .orders
        .list_order_items(id, &auth_user)
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

/// Confirm payment for an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm-payment",
    summary = "Confirm payment",
    description = "Marks the order as paid, making it eligible for delivery assignment. Admin only.",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment confirmed", body = OrderResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment already confirmed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .confirm_payment(id, &auth_user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
