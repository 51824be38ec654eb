use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SupplyLine API",
        version = "1.0.0",
        description = r#"
# SupplyLine Ordering API

Backend for hotel and restaurant supply ordering: clients assemble quotes,
managers price them under an exclusive lock, approved quotes convert into
orders, and deliveries close with a verified three-way handshake.

## Authentication

All endpoints except login require a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "Quote 5c0e... is locked by manager 91ab...",
  "status": 409
}
```

## Pagination

List endpoints accept the following query parameters:
- `page`: Page number (default: 1)
- `limit`: Items per page (default: 20, max: 100)
- `status`: Optional status filter
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Quotes", description = "Quote lifecycle and pricing lock endpoints"),
        (name = "Orders", description = "Order read and payment endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Deliveries", description = "Delivery assignment and verification endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    modifiers(&SecurityAddon),
    paths(
        // Auth
        crate::auth::login_handler,

        // Quotes
        crate::handlers::quotes::create_quote,
        crate::handlers::quotes::list_quotes,
        crate::handlers::quotes::get_quote,
        crate::handlers::quotes::delete_quote,
        crate::handlers::quotes::replace_items,
        crate::handlers::quotes::submit_quote,
        crate::handlers::quotes::acquire_lock,
        crate::handlers::quotes::release_lock,
        crate::handlers::quotes::get_lock_status,
        crate::handlers::quotes::set_pricing,
        crate::handlers::quotes::approve_quote,
        crate::handlers::quotes::reject_quote,
        crate::handlers::quotes::convert_quote,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_items,
        crate::handlers::orders::confirm_payment,

        // Products
        crate::handlers::products::create_product,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::deactivate_product,

        // Deliveries
        crate::handlers::deliveries::assign_delivery,
        crate::handlers::deliveries::list_deliveries,
        crate::handlers::deliveries::get_delivery,
        crate::handlers::deliveries::update_delivery_status,
        crate::handlers::deliveries::verify_delivery,
        crate::handlers::deliveries::confirm_delivery,
        crate::handlers::deliveries::get_short_code,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::ListQuery,

            // Auth types
            crate::auth::LoginCredentials,
            crate::auth::TokenResponse,

            // Quote types
            crate::services::quotes::CreateQuoteRequest,
            crate::services::quotes::ReplaceItemsRequest,
            crate::services::quotes::QuoteItemInput,
            crate::services::quotes::SetPricingRequest,
            crate::services::quotes::PricedItemInput,
            crate::services::quotes::ConvertQuoteRequest,
            crate::services::quotes::QuoteResponse,
            crate::services::quotes::QuoteItemResponse,
            crate::services::quotes::QuoteSummary,
            crate::services::quotes::QuoteListResponse,
            crate::services::quote_locks::LockStatus,

            // Order types
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderListResponse,

            // Product types
            crate::services::products::CreateProductRequest,
            crate::services::products::ProductResponse,
            crate::services::products::ProductListResponse,

            // Delivery types
            crate::services::deliveries::AssignDeliveryRequest,
            crate::services::deliveries::UpdateDeliveryStatusRequest,
            crate::services::deliveries::VerifyDeliveryRequest,
            crate::services::deliveries::DeliveryResponse,
            crate::services::deliveries::DeliveryListResponse,
            crate::services::deliveries::ShortCodeResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_covers_the_surface() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("SupplyLine API"));
        assert!(json.contains("/api/v1/quotes"));
        assert!(json.contains("/api/v1/deliveries"));
        assert!(json.contains("/auth/login"));
    }
}
