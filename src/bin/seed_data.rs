//! Seed data script - populates the database with realistic demo data
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - one user per role (admin, manager, client x2, agent)
//! - a catalog of hospitality supply products
//! - two quotes: one still collecting items, one priced and awaiting approval

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use std::time::Duration as StdDuration;
use tracing::info;
use uuid::Uuid;

use supplyline_api::auth::hash_password;
use supplyline_api::entities::{
    product, quote,
    quote::QuoteStatus,
    quote_item,
    user::{self, UserRole},
};

const DEMO_PASSWORD: &str = "supplyline-demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("=== SupplyLine API Seed Data ===");
    info!("Creating demo data for exploration...\n");

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://supplyline.db?mode=rwc".to_string());

    let mut options = ConnectOptions::new(database_url.clone());
    options
        .max_connections(5)
        .min_connections(1)
        .connect_timeout(StdDuration::from_secs(10))
        .acquire_timeout(StdDuration::from_secs(10));

    info!("Connecting to database: {}", database_url);
    let db = Database::connect(options).await?;
    info!("Connected!\n");

    // The seed runs on a fresh database, so bring the schema up first.
    supplyline_api::db::run_migrations(&db).await?;

    info!("Creating users...");
    let users = create_users(&db).await?;
    info!("  Created {} users (password: {})", users.len(), DEMO_PASSWORD);

    info!("Creating products...");
    let products = create_products(&db).await?;
    info!("  Created {} products", products.len());

    info!("Creating quotes...");
    let quote_count = create_quotes(&db, &users, &products).await?;
    info!("  Created {} quotes with items", quote_count);

    info!("\n=== Seed Data Complete ===");
    info!("Your SupplyLine API is now populated with demo data!");
    info!("");
    info!("Log in first, for example:");
    info!("  curl -X POST http://localhost:8080/auth/login \\");
    info!("    -H 'content-type: application/json' \\");
    info!(
        "    -d '{{\"email\":\"purchasing@grandharbor.test\",\"password\":\"{}\"}}'",
        DEMO_PASSWORD
    );
    info!("");
    info!("Then explore with the bearer token:");
    info!("  curl http://localhost:8080/api/v1/products -H 'authorization: Bearer <token>'");
    info!("  curl http://localhost:8080/api/v1/quotes -H 'authorization: Bearer <token>'");
    info!("");
    info!("Or interactively at: http://localhost:8080/swagger-ui");

    Ok(())
}

async fn create_users(db: &sea_orm::DatabaseConnection) -> anyhow::Result<Vec<user::Model>> {
    let users_data = vec![
        ("Ada Quist", "admin@supplyline.test", UserRole::Admin),
        ("Marco Vane", "manager@supplyline.test", UserRole::Manager),
        (
            "Grand Harbor Hotel",
            "purchasing@grandharbor.test",
            UserRole::Client,
        ),
        (
            "Harbor Bistro",
            "kitchen@harborbistro.test",
            UserRole::Client,
        ),
        ("Devon Riggs", "agent@supplyline.test", UserRole::Agent),
    ];

    let password_hash = hash_password(DEMO_PASSWORD)?;
    let mut created = Vec::new();
    let now = Utc::now();

    for (name, email, role) in users_data {
        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(password_hash.clone()),
            role: Set(role),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = user.insert(db).await?;
        created.push(model);
    }

    Ok(created)
}

async fn create_products(
    db: &sea_orm::DatabaseConnection,
) -> anyhow::Result<Vec<product::Model>> {
    let products_data = vec![
        // Linens
        ("Hotel Bath Towel 70x140", "LIN-TWL-70", "piece", "600 gsm combed cotton, tumble-dry safe, hotel white."),
        ("Queen Bed Sheet Set", "LIN-SHT-Q", "set", "Percale weave, 200 thread count, fitted + flat + two pillowcases."),
        // Amenities
        ("Guest Soap Bar 25g", "AMN-SOAP-25", "carton", "Individually wrapped, 500 bars per carton, neutral fragrance."),
        ("Shampoo Dispenser Refill 5L", "AMN-SHM-5L", "canister", "Fits wall-mounted dispensers, pH neutral."),
        ("Toilet Paper 2-Ply", "AMN-TP-96", "case", "96 rolls per case, embossed 2-ply."),
        // Kitchen
        ("Espresso Beans Dark Roast", "KIT-ESP-1K", "kg", "Arabica blend roasted for espresso machines."),
        ("Extra Virgin Olive Oil 5L", "KIT-OIL-5L", "tin", "Cold-pressed, first harvest, food-service tin."),
        // Cleaning
        ("All-Purpose Cleaner 10L", "CLN-APC-10", "drum", "Concentrate, dilute 1:40 for daily surfaces."),
        ("Dishwasher Detergent 25kg", "CLN-DSH-25", "sack", "Powder for commercial pass-through machines."),
        // Tableware
        ("Porcelain Dinner Plate 27cm", "TBL-PLT-27", "dozen", "Vitrified porcelain, chip-resistant rolled edge."),
    ];

    let mut created = Vec::new();
    let now = Utc::now();

    for (name, sku, unit, description) in products_data {
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            unit: Set(unit.to_string()),
            description: Set(Some(description.to_string())),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = product.insert(db).await?;
        created.push(model);
    }

    Ok(created)
}

async fn create_quotes(
    db: &sea_orm::DatabaseConnection,
    users: &[user::Model],
    products: &[product::Model],
) -> anyhow::Result<usize> {
    let manager = users
        .iter()
        .find(|u| u.role == UserRole::Manager)
        .ok_or_else(|| anyhow::anyhow!("seed users are missing a manager"))?;
    let clients: Vec<&user::Model> = users.iter().filter(|u| u.role == UserRole::Client).collect();
    let now = Utc::now();

    // Quote 1: the hotel is still collecting items, nothing priced yet.
    let hotel = clients[0];
    let draft_id = Uuid::new_v4();
    quote::ActiveModel {
        id: Set(draft_id),
        client_id: Set(hotel.id),
        manager_id: Set(None),
        status: Set(QuoteStatus::PendingItems),
        total_amount: Set(Decimal::ZERO),
        sourcing_notes: Set(None),
        locked_by: Set(None),
        locked_at: Set(None),
        lock_expires_at: Set(None),
        valid_until: Set(None),
        created_at: Set(now - Duration::hours(3)),
        updated_at: Set(now - Duration::hours(1)),
    }
    .insert(db)
    .await?;

    for (sku, quantity) in [("LIN-TWL-70", 40), ("LIN-SHT-Q", 20)] {
        let product = product_by_sku(products, sku)?;
        quote_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            quote_id: Set(draft_id),
            product_id: Set(product.id),
            quantity: Set(quantity),
            unit_price: Set(Decimal::ZERO),
            subtotal: Set(Decimal::ZERO),
        }
        .insert(db)
        .await?;
    }

    // Quote 2: the bistro's quote has been priced and awaits their approval.
    let bistro = clients[1];
    let priced_id = Uuid::new_v4();
    let priced_lines = [
        ("KIT-ESP-1K", 10, dec!(18.50)),
        ("KIT-OIL-5L", 4, dec!(42.00)),
    ];

    let mut total = Decimal::ZERO;
    for (_, quantity, unit_price) in priced_lines {
        total += unit_price * Decimal::from(quantity);
    }

    quote::ActiveModel {
        id: Set(priced_id),
        client_id: Set(bistro.id),
        manager_id: Set(Some(manager.id)),
        status: Set(QuoteStatus::AwaitingClientApproval),
        total_amount: Set(total),
        sourcing_notes: Set(Some(
            "Priced from the coastal supplier list; coffee is on promotion until Friday."
                .to_string(),
        )),
        locked_by: Set(None),
        locked_at: Set(None),
        lock_expires_at: Set(None),
        valid_until: Set(Some(now + Duration::days(7))),
        created_at: Set(now - Duration::days(2)),
        updated_at: Set(now - Duration::hours(6)),
    }
    .insert(db)
    .await?;

    for (sku, quantity, unit_price) in priced_lines {
        let product = product_by_sku(products, sku)?;
        let subtotal = unit_price * Decimal::from(quantity);
        quote_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            quote_id: Set(priced_id),
            product_id: Set(product.id),
            quantity: Set(quantity),
            unit_price: Set(unit_price),
            subtotal: Set(subtotal),
        }
        .insert(db)
        .await?;
    }

    Ok(2)
}

fn product_by_sku<'a>(
    products: &'a [product::Model],
    sku: &str,
) -> anyhow::Result<&'a product::Model> {
    products
        .iter()
        .find(|p| p.sku == sku)
        .ok_or_else(|| anyhow::anyhow!("seed products are missing SKU {}", sku))
}
