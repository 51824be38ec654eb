use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::quote::QuoteStatus;
use crate::services::quote_locks::LockStatus;
use crate::services::quotes::{
    ConvertQuoteRequest, CreateQuoteRequest, QuoteListResponse, QuoteResponse, QuoteSummary,
    ReplaceItemsRequest, SetPricingRequest,
};
use crate::{
    auth::AuthUser, errors::ServiceError, services::orders::OrderResponse, ApiResponse, AppState,
    ListQuery,
};

fn parse_quote_status(raw: &str) -> Result<QuoteStatus, ServiceError> {
    QuoteStatus::from_str(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("Unknown quote status {}", raw)))
}

fn require_manager(auth_user: &AuthUser) -> Result<(), ServiceError> {
    if !auth_user.has_manager_access() {
        return Err(ServiceError::Forbidden(
            "Only managers can hold pricing locks".to_string(),
        ));
    }
    Ok(())
}

/// Create a new quote
#[utoipa::path(
    post,
    path = "/api/v1/quotes",
    summary = "Create quote",
    description = "Open an empty quote for the calling client to add items to",
    request_body = CreateQuoteRequest,
    responses(
        (status = 201, description = "Quote created", body = QuoteResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_quote(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<QuoteResponse>>), ServiceError> {
    let quote = state
        .services
        .quotes
        .create_quote(&auth_user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(quote))))
}

/// List quotes with pagination and optional status filter
#[utoipa::path(
    get,
    path = "/api/v1/quotes",
    summary = "List quotes",
    description = "Clients see their own quotes; managers see all. Supports a status filter for the pricing queue.",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("status" = Option<String>, Query, description = "Filter by quote status, e.g. PENDING_PRICING"),
    ),
    responses(
        (status = 200, description = "Quotes retrieved", body = QuoteListResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_quotes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteListResponse>>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(parse_quote_status)
        .transpose()?;
    let result = state
        .services
        .quotes
        .list_quotes(&auth_user, status, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Get a single quote with its items
#[utoipa::path(
    get,
    path = "/api/v1/quotes/{id}",
    summary = "Get quote",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Quote retrieved", body = QuoteResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state.services.quotes.get_quote(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Delete a quote that has not been approved or converted
#[utoipa::path(
    delete,
    path = "/api/v1/quotes/{id}",
    summary = "Delete quote",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 204, description = "Quote deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is locked or past approval", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.quotes.delete_quote(id, &auth_user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the item list of a quote still collecting items
#[utoipa::path(
    put,
    path = "/api/v1/quotes/{id}/items",
    summary = "Replace quote items",
    description = "Replaces the entire item list. Only allowed while the quote is in PENDING_ITEMS.",
    params(("id" = Uuid, Path, description = "Quote ID")),
    request_body = ReplaceItemsRequest,
    responses(
        (status = 200, description = "Items replaced", body = QuoteResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is past item collection", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn replace_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<ReplaceItemsRequest>,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state
        .services
        .quotes
        .replace_items(id, &auth_user, request)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Submit a quote for manager pricing
#[utoipa::path(
    post,
    path = "/api/v1/quotes/{id}/submit",
    summary = "Submit quote",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Quote submitted", body = QuoteResponse),
        (status = 400, description = "Quote has no items", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is not in PENDING_ITEMS", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn submit_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state.services.quotes.submit_quote(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Acquire the pricing lock on a quote
#[utoipa::path(
    post,
    path = "/api/v1/quotes/{id}/lock",
    summary = "Acquire pricing lock",
    description = "Grants the calling manager exclusive pricing rights for thirty minutes. Re-acquiring refreshes the window; an expired foreign lock can be taken over.",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Lock acquired", body = QuoteSummary),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is locked by another manager", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn acquire_lock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteSummary>>, ServiceError> {
    require_manager(&auth_user)?;
    let quote = state
        .services
        .quote_locks
        .acquire(id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(QuoteSummary::from(quote))))
}

/// Release a held pricing lock
#[utoipa::path(
    delete,
    path = "/api/v1/quotes/{id}/lock",
    summary = "Release pricing lock",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 204, description = "Lock released"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Lock is held by another manager", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn release_lock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    require_manager(&auth_user)?;
    state
        .services
        .quote_locks
        .release(id, auth_user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Inspect the pricing lock on a quote
#[utoipa::path(
    get,
    path = "/api/v1/quotes/{id}/lock",
    summary = "Get lock status",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Lock status", body = LockStatus),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_lock_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<LockStatus>>, ServiceError> {
    require_manager(&auth_user)?;
    let status = state
        .services
        .quote_locks
        .lock_status(id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Record pricing for a locked quote
#[utoipa::path(
    put,
    path = "/api/v1/quotes/{id}/pricing",
    summary = "Set quote pricing",
    description = "Replaces the item list with priced lines and sends the quote for client approval. Requires a live pricing lock held by the caller; the lock is cleared on success.",
    params(("id" = Uuid, Path, description = "Quote ID")),
    request_body = SetPricingRequest,
    responses(
        (status = 200, description = "Pricing recorded", body = QuoteResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Lock is missing, expired or foreign", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn set_pricing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<SetPricingRequest>,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state
        .services
        .quotes
        .set_pricing(id, &auth_user, request)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Approve priced work as the owning client
#[utoipa::path(
    post,
    path = "/api/v1/quotes/{id}/approve",
    summary = "Approve quote",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Quote approved", body = QuoteResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is not awaiting approval", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn approve_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state.services.quotes.approve_quote(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Reject priced work as the owning client
#[utoipa::path(
    post,
    path = "/api/v1/quotes/{id}/reject",
    summary = "Reject quote",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Quote rejected", body = QuoteResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is not awaiting approval", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn reject_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<QuoteResponse>>, ServiceError> {
    let quote = state.services.quotes.reject_quote(id, &auth_user).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Convert an approved quote into an order
#[utoipa::path(
    post,
    path = "/api/v1/quotes/{id}/convert",
    summary = "Convert quote to order",
    description = "Creates the order with a snapshot of the priced items. Fails if the approval window has lapsed.",
    params(("id" = Uuid, Path, description = "Quote ID")),
    request_body = ConvertQuoteRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Invalid shipping address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quote is not approved or has expired", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn convert_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<ConvertQuoteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state
        .services
        .quotes
        .convert_to_order(id, &auth_user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}
