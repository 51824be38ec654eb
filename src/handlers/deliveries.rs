use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::delivery::DeliveryStatus;
use crate::services::deliveries::{
    AssignDeliveryRequest, DeliveryListResponse, DeliveryResponse, ShortCodeResponse,
    UpdateDeliveryStatusRequest, VerifyDeliveryRequest,
};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, AppState, ListQuery};

fn parse_delivery_status(raw: &str) -> Result<DeliveryStatus, ServiceError> {
    DeliveryStatus::from_str(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("Unknown delivery status {}", raw)))
}

/// Assign a paid order to a delivery agent
#[utoipa::path(
    post,
    path = "/api/v1/deliveries",
    summary = "Assign delivery",
    description = "Creates the delivery with a sealed verification code and moves the order to IN_TRANSIT",
    request_body = AssignDeliveryRequest,
    responses(
        (status = 201, description = "Delivery assigned", body = DeliveryResponse),
        (status = 400, description = "Agent is not valid", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order unpaid or already assigned", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn assign_delivery(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AssignDeliveryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<DeliveryResponse>>), ServiceError> {
    let delivery = state
        .services
        .deliveries
        .assign_delivery(&auth_user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(delivery))))
}

/// List deliveries with pagination and optional status filter
#[utoipa::path(
    get,
    path = "/api/v1/deliveries",
    summary = "List deliveries",
    description = "Agents see their assignments, clients the deliveries of their orders, managers everything",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("status" = Option<String>, Query, description = "Filter by delivery status, e.g. IN_TRANSIT"),
    ),
    responses(
        (status = 200, description = "Deliveries retrieved", body = DeliveryListResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<DeliveryListResponse>>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(parse_delivery_status)
        .transpose()?;
    let result = state
        .services
        .deliveries
        .list_deliveries(&auth_user, status, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Get a single delivery
#[utoipa::path(
    get,
    path = "/api/v1/deliveries/{id}",
    summary = "Get delivery",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Delivery retrieved", body = DeliveryResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Delivery not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<DeliveryResponse>>, ServiceError> {
    let delivery = state
        .services
        .deliveries
        .get_delivery(id, &auth_user)
        .await?;
    Ok(Json(ApiResponse::success(delivery)))
}

/// Agent progress report
#[utoipa::path(
    put,
    path = "/api/v1/deliveries/{id}/status",
    summary = "Update delivery status",
    description = "Moves the delivery one step along PICKED_UP, IN_TRANSIT, DELIVERED. Assigned agent only.",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    request_body = UpdateDeliveryStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = DeliveryResponse),
        (status = 400, description = "Invalid status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Delivery assigned to another agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Delivery not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition is not sequential", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_delivery_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<UpdateDeliveryStatusRequest>,
) -> Result<Json<ApiResponse<DeliveryResponse>>, ServiceError> {
    let delivery = state
        .services
        .deliveries
        .update_status(id, &auth_user, request)
        .await?;
    Ok(Json(ApiResponse::success(delivery)))
}

/// Client receipt verification
#[utoipa::path(
    post,
    path = "/api/v1/deliveries/{id}/verify",
    summary = "Verify delivery",
    description = "The owning client presents the verification code received at assignment. Wrong, foreign or expired codes are rejected without touching the delivery.",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    request_body = VerifyDeliveryRequest,
    responses(
        (status = 200, description = "Delivery verified", body = DeliveryResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Delivery not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Delivery is not awaiting verification", body = crate::errors::ErrorResponse),
        (status = 422, description = "Verification code rejected", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn verify_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<VerifyDeliveryRequest>,
) -> Result<Json<ApiResponse<DeliveryResponse>>, ServiceError> {
    let delivery = state
        .services
        .deliveries
        .verify_by_client(id, &auth_user, request)
        .await?;
    Ok(Json(ApiResponse::success(delivery)))
}

/// Manager close-out of a verified delivery
#[utoipa::path(
    post,
    path = "/api/v1/deliveries/{id}/confirm",
    summary = "Confirm delivery",
    description = "Confirms a client-verified delivery and marks the order DELIVERED. Single use.",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Delivery confirmed", body = DeliveryResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Delivery not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Delivery is not client-verified", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<DeliveryResponse>>, ServiceError> {
    let delivery = state
        .services
        .deliveries
        .confirm_by_manager(id, &auth_user)
        .await?;
    Ok(Json(ApiResponse::success(delivery)))
}

/// Spoken confirmation digits for the assigned agent
#[utoipa::path(
    get,
    path = "/api/v1/deliveries/{id}/short-code",
    summary = "Get short code",
    description = "Six digits derived from the delivery and order ids, used for verbal confirmation at handoff",
    params(("id" = Uuid, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Short code", body = ShortCodeResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Delivery assigned to another agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Delivery not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_short_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<ShortCodeResponse>>, ServiceError> {
    let code = state.services.deliveries.short_code(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(code)))
}
