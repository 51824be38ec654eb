//! Product catalog. Quote items reference products by id; only active
//! products can be quoted. Deactivation hides a product from clients without
//! breaking historical quotes and orders that point at it.

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200, message = "Product name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 64, message = "SKU is required"))]
    pub sku: String,
    #[validate(length(min = 1, max = 32, message = "Unit of measure is required"))]
    pub unit: String,
    #[validate(length(max = 2000, message = "Description is too long"))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub unit: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(product: product::Model) -> Self {
        Self {
            id: product.id,
            name: product.name,
            sku: product.sku,
            unit: product.unit,
            description: product.description,
            is_active: product.is_active,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing the product catalog
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(caller_id = %caller.user_id))]
    pub async fn create_product(
        &self,
        caller: &AuthUser,
        request: CreateProductRequest,
    ) -> Result<ProductResponse, ServiceError> {
        request.validate()?;

        if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Only managers can manage the catalog".to_string(),
            ));
        }

        let sku = request.sku.trim().to_uppercase();
        let existing = ProductEntity::find()
            .filter(product::Column::Sku.eq(sku.clone()))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "A product with SKU {} already exists",
                sku
            )));
        }

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            sku: Set(sku),
            unit: Set(request.unit.trim().to_string()),
            description: Set(request.description),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %model.id, sku = %model.sku, "Product created");

        Ok(ProductResponse::from(model))
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductResponse, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        Ok(ProductResponse::from(product))
    }

    /// Lists the catalog. Managers see inactive products as well; everyone
    /// else sees only what can currently be quoted.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        caller: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<ProductListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = ProductEntity::find();
        if !caller.has_manager_access() {
            query = query.filter(product::Column::IsActive.eq(true));
        }

        let paginator = query
            .order_by_asc(product::Column::Name)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let products = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(ProductListResponse {
            products: products.into_iter().map(ProductResponse::from).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Hide a product from new quotes without touching existing ones.
    #[instrument(skip(self), fields(product_id = %product_id, caller_id = %caller.user_id))]
    pub async fn deactivate_product(
        &self,
        product_id: Uuid,
        caller: &AuthUser,
    ) -> Result<ProductResponse, ServiceError> {
        if !caller.has_manager_access() {
            return Err(ServiceError::Forbidden(
                "Only managers can manage the catalog".to_string(),
            ));
        }

        let result = ProductEntity::update_many()
            .col_expr(product::Column::IsActive, Expr::value(false))
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        info!(product_id = %product_id, "Product deactivated");
        self.get_product(product_id).await
    }
}
