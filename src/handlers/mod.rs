pub mod deliveries;
pub mod orders;
pub mod products;
pub mod quotes;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::codes::CodeKey;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub quotes: Arc<crate::services::quotes::QuoteService>,
    pub quote_locks: Arc<crate::services::quote_locks::QuoteLockService>,
    pub orders: Arc<crate::services::orders::OrderService>,
    pub products: Arc<crate::services::products::ProductService>,
    pub deliveries: Arc<crate::services::deliveries::DeliveryService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, code_key: CodeKey) -> Self {
        let quotes = Arc::new(crate::services::quotes::QuoteService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let quote_locks = Arc::new(crate::services::quote_locks::QuoteLockService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let products = Arc::new(crate::services::products::ProductService::new(
            db_pool.clone(),
        ));
        let deliveries = Arc::new(crate::services::deliveries::DeliveryService::new(
            db_pool,
            event_sender,
            code_key,
        ));

        Self {
            quotes,
            quote_locks,
            orders,
            products,
            deliveries,
        }
    }
}
