//! Tests for delivery assignment and the three-way verification handshake:
//!
//! - assignment guards (payment, agent validity, one delivery per order)
//! - the agent-driven status progression
//! - client verification against the sealed code, including tampering and
//!   expiry
//! - manager confirmation and the order status cascade
//! - the sealed code never appearing in API responses

mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp, TEST_CODE_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use supplyline_api::{
    entities::{
        delivery::{self, DeliveryStatus, Entity as DeliveryEntity},
        order::{Entity as OrderEntity, OrderStatus},
        user,
    },
    errors::ServiceError,
    services::{
        codes::{self, CodeKey, DeliveryCodePayload},
        deliveries::{AssignDeliveryRequest, UpdateDeliveryStatusRequest, VerifyDeliveryRequest},
        quotes::{
            ConvertQuoteRequest, CreateQuoteRequest, PricedItemInput, QuoteItemInput,
            ReplaceItemsRequest, SetPricingRequest,
        },
    },
};
use uuid::Uuid;

/// Walk a quote through pricing and approval and convert it, returning the
/// order id. The order is left awaiting payment.
async fn order_via_quote(
    app: &TestApp,
    client: &user::Model,
    manager: &user::Model,
    sku: &str,
) -> Uuid {
    let product = app.seed_product("Table Linen", sku, "set").await;
    let client_caller = app.auth_user(client);
    let quotes = &app.state.services.quotes;

    let created = quotes
        .create_quote(
            &client_caller,
            CreateQuoteRequest {
                sourcing_notes: None,
            },
        )
        .await
        .expect("create quote");
    quotes
        .replace_items(
            created.id,
            &client_caller,
            ReplaceItemsRequest {
                items: vec![QuoteItemInput {
                    product_id: product.id,
                    quantity: 6,
                }],
            },
        )
        .await
        .expect("items");
    quotes
        .submit_quote(created.id, &client_caller)
        .await
        .expect("submit");
    app.state
        .services
        .quote_locks
        .acquire(created.id, manager.id)
        .await
        .expect("lock");
    quotes
        .set_pricing(
            created.id,
            &app.auth_user(manager),
            SetPricingRequest {
                items: vec![PricedItemInput {
                    product_id: product.id,
                    quantity: 6,
                    unit_price: dec!(22.75),
                }],
                sourcing_notes: None,
            },
        )
        .await
        .expect("pricing");
    quotes
        .approve_quote(created.id, &client_caller)
        .await
        .expect("approve");

    let order = quotes
        .convert_to_order(
            created.id,
            &client_caller,
            ConvertQuoteRequest {
                shipping_address: "Grand Harbor Hotel, 1 Quay Street".to_string(),
            },
        )
        .await
        .expect("convert");
    order.id
}

/// Same as [`order_via_quote`], with the payment confirmed by an admin.
async fn paid_order(
    app: &TestApp,
    client: &user::Model,
    manager: &user::Model,
    admin: &user::Model,
    sku: &str,
) -> Uuid {
    let order_id = order_via_quote(app, client, manager, sku).await;
    app.state
        .services
        .orders
        .confirm_payment(order_id, &app.auth_user(admin))
        .await
        .expect("confirm payment");
    order_id
}

async fn assign(
    app: &TestApp,
    manager: &user::Model,
    order_id: Uuid,
    agent_id: Uuid,
) -> Result<Uuid, ServiceError> {
    app.state
        .services
        .deliveries
        .assign_delivery(&app.auth_user(manager), AssignDeliveryRequest { order_id, agent_id })
        .await
        .map(|delivery| delivery.id)
}

fn status_report(status: &str) -> UpdateDeliveryStatusRequest {
    UpdateDeliveryStatusRequest {
        status: status.to_string(),
        current_lat: None,
        current_lng: None,
        notes: None,
    }
}

/// Drive an assigned delivery to DELIVERED through the agent reports.
async fn deliver(app: &TestApp, agent: &user::Model, delivery_id: Uuid) {
    let caller = app.auth_user(agent);
    let deliveries = &app.state.services.deliveries;
    for status in ["PICKED_UP", "IN_TRANSIT", "DELIVERED"] {
        deliveries
            .update_status(delivery_id, &caller, status_report(status))
            .await
            .expect("agent progress report");
    }
}

async fn delivery_row(app: &TestApp, delivery_id: Uuid) -> delivery::Model {
    DeliveryEntity::find_by_id(delivery_id)
        .one(&*app.state.db)
        .await
        .expect("fetch delivery")
        .expect("delivery exists")
}

/// Replace the stored sealed code with one minted from `payload`, returning
/// the new code.
async fn reseal_stored_code(
    app: &TestApp,
    delivery_id: Uuid,
    payload: &DeliveryCodePayload,
) -> String {
    let code = codes::seal(payload, &CodeKey::derive(TEST_CODE_SECRET)).expect("seal");
    DeliveryEntity::update_many()
        .col_expr(delivery::Column::DeliveryCode, Expr::value(code.clone()))
        .filter(delivery::Column::Id.eq(delivery_id))
        .exec(&*app.state.db)
        .await
        .expect("store code");
    code
}

#[tokio::test]
async fn assignment_requires_confirmed_payment() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = order_via_quote(&app, &client, &manager, "DLV-PAY").await;

    let err = assign(&app, &manager, order_id, agent.id)
        .await
        .expect_err("unpaid orders cannot ship");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("no confirmed payment"));
}

#[tokio::test]
async fn assignment_rejects_anyone_but_an_active_agent() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-AGT").await;

    // A client is not an agent.
    let err = assign(&app, &manager, order_id, client.id)
        .await
        .expect_err("clients cannot carry deliveries");
    assert_matches!(
        err,
        ServiceError::InvalidInput(ref msg) if msg.contains("not an active delivery agent")
    );

    // Nor is a deactivated agent.
    let retired = app.seed_agent("retired@delivery.test").await;
    user::Entity::update_many()
        .col_expr(user::Column::Active, Expr::value(false))
        .filter(user::Column::Id.eq(retired.id))
        .exec(&*app.state.db)
        .await
        .expect("deactivate agent");
    let err = assign(&app, &manager, order_id, retired.id)
        .await
        .expect_err("inactive agents are out of rotation");
    assert_matches!(
        err,
        ServiceError::InvalidInput(ref msg) if msg.contains("not an active delivery agent")
    );
}

#[tokio::test]
async fn assignment_moves_the_order_and_seals_a_code() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-ASGN").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");

    // Order travels with its delivery.
    let order = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(order.status, OrderStatus::InTransit);

    // The stored code opens under the server key and addresses this exact
    // delivery.
    let row = delivery_row(&app, delivery_id).await;
    assert_eq!(row.status, DeliveryStatus::Assigned);
    assert!(!row.delivery_code.is_empty());
    let payload = codes::open(&row.delivery_code, &CodeKey::derive(TEST_CODE_SECRET))
        .expect("stored code opens");
    assert_eq!(payload.delivery_id, delivery_id);
    assert_eq!(payload.order_id, order_id);
    assert_eq!(payload.client_id, client.id);

    // A second assignment for the same order is refused.
    let other_agent = app.seed_agent("second@delivery.test").await;
    let err = assign(&app, &manager, order_id, other_agent.id)
        .await
        .expect_err("one delivery per order");
    assert_matches!(
        err,
        ServiceError::Conflict(ref msg) if msg.contains("already has a delivery assigned")
    );
}

#[tokio::test]
async fn the_sealed_code_never_appears_in_responses() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-SEAL").await;

    let assign_response = app
        .request_as(
            &manager,
            Method::POST,
            "/api/v1/deliveries",
            Some(json!({"order_id": order_id, "agent_id": agent.id})),
        )
        .await;
    assert_eq!(assign_response.status(), StatusCode::CREATED);
    let body = response_json(assign_response).await;
    assert!(body["data"].get("delivery_code").is_none());
    let delivery_id = body["data"]["id"].as_str().expect("delivery id").to_string();

    for account in [&client, &manager] {
        let get = app
            .request_as(
                account,
                Method::GET,
                &format!("/api/v1/deliveries/{}", delivery_id),
                None,
            )
            .await;
        assert_eq!(get.status(), StatusCode::OK);
        let body = response_json(get).await;
        assert!(body["data"].get("delivery_code").is_none());
        assert!(body["data"].get("code_generated_at").is_none());
    }
}

#[tokio::test]
async fn only_the_assigned_agent_advances_the_delivery() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;
    let rival = app.seed_agent("rival@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-PROG").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    let deliveries = &app.state.services.deliveries;

    // Another agent cannot move it.
    let err = deliveries
        .update_status(delivery_id, &app.auth_user(&rival), status_report("PICKED_UP"))
        .await
        .expect_err("foreign agent");
    assert_matches!(
        err,
        ServiceError::Forbidden(ref msg) if msg.contains("assigned to another agent")
    );

    // Neither can a manager; progress reports are the agent's job.
    let err = deliveries
        .update_status(delivery_id, &app.auth_user(&manager), status_report("PICKED_UP"))
        .await
        .expect_err("managers do not drive");
    assert_matches!(err, ServiceError::Forbidden(_));

    // Steps cannot be skipped.
    let err = deliveries
        .update_status(delivery_id, &app.auth_user(&agent), status_report("IN_TRANSIT"))
        .await
        .expect_err("no skipping");
    assert_matches!(
        err,
        ServiceError::Conflict(ref msg) if msg.contains("cannot move from ASSIGNED to IN_TRANSIT")
    );

    // Verification statuses are not agent targets.
    let err = deliveries
        .update_status(
            delivery_id,
            &app.auth_user(&agent),
            status_report("CLIENT_VERIFIED"),
        )
        .await
        .expect_err("handshake statuses are off limits");
    assert_matches!(err, ServiceError::InvalidInput(ref msg) if msg.contains("cannot report"));

    let err = deliveries
        .update_status(delivery_id, &app.auth_user(&agent), status_report("TELEPORTED"))
        .await
        .expect_err("unknown status");
    assert_matches!(err, ServiceError::InvalidInput(ref msg) if msg.contains("Unknown delivery status"));

    // The legal progression works and DELIVERED stamps the arrival time.
    let picked = deliveries
        .update_status(
            delivery_id,
            &app.auth_user(&agent),
            UpdateDeliveryStatusRequest {
                status: "PICKED_UP".to_string(),
                current_lat: Some(54.32),
                current_lng: Some(-2.75),
                notes: Some("Left the depot".to_string()),
            },
        )
        .await
        .expect("pick up");
    assert_eq!(picked.status, "PICKED_UP");
    assert_eq!(picked.current_lat, Some(54.32));
    assert_eq!(picked.notes.as_deref(), Some("Left the depot"));
    assert!(picked.actual_delivery.is_none());

    deliveries
        .update_status(delivery_id, &app.auth_user(&agent), status_report("IN_TRANSIT"))
        .await
        .expect("in transit");
    let delivered = deliveries
        .update_status(delivery_id, &app.auth_user(&agent), status_report("DELIVERED"))
        .await
        .expect("delivered");
    assert_eq!(delivered.status, "DELIVERED");
    assert!(delivered.actual_delivery.is_some());
}

#[tokio::test]
async fn client_verification_checks_the_code_and_the_handshake_order() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-VRFY").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    let deliveries = &app.state.services.deliveries;
    let stored_code = delivery_row(&app, delivery_id).await.delivery_code;

    // Verification is pointless before the parcel arrives.
    let err = deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest {
                code: stored_code.clone(),
            },
        )
        .await
        .expect_err("nothing to verify yet");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("ASSIGNED"));

    deliver(&app, &agent, delivery_id).await;

    // A wrong code is rejected without touching the delivery.
    let err = deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest {
                code: "completely-wrong".to_string(),
            },
        )
        .await
        .expect_err("wrong code");
    assert_matches!(err, ServiceError::InvalidCode(ref msg) if msg.contains("does not match"));
    let row = delivery_row(&app, delivery_id).await;
    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert!(row.client_verified_at.is_none());

    // Another client cannot verify even with the right code.
    let intruder = app.seed_client("intruder@delivery.test").await;
    let err = deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&intruder),
            VerifyDeliveryRequest {
                code: stored_code.clone(),
            },
        )
        .await
        .expect_err("foreign client");
    assert_matches!(
        err,
        ServiceError::Forbidden(ref msg) if msg.contains("belongs to another client")
    );

    // The right code from the right client closes the verification step.
    let verified = deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest {
                code: stored_code.clone(),
            },
        )
        .await
        .expect("verify");
    assert_eq!(verified.status, "CLIENT_VERIFIED");
    assert!(verified.client_verified_at.is_some());
    let row = delivery_row(&app, delivery_id).await;
    assert_eq!(row.client_verified_by, Some(client.id));

    // Verification is single use.
    let err = deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest { code: stored_code },
        )
        .await
        .expect_err("second verification");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("CLIENT_VERIFIED"));
}

#[tokio::test]
async fn expired_codes_are_refused() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-EXP").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    deliver(&app, &agent, delivery_id).await;

    // Age the sealed code past its window; the expiry lives inside the
    // authenticated payload, so the stored code itself has to be replaced.
    let mut payload = DeliveryCodePayload::new(delivery_id, order_id, client.id);
    payload.issued_at = Utc::now() - Duration::hours(25);
    let stale_code = reseal_stored_code(&app, delivery_id, &payload).await;

    let err = app
        .state
        .services
        .deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest { code: stale_code },
        )
        .await
        .expect_err("expired code");
    assert_matches!(err, ServiceError::InvalidCode(ref msg) if msg.contains("expired"));

    let row = delivery_row(&app, delivery_id).await;
    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert!(row.client_verified_at.is_none());
}

#[tokio::test]
async fn a_code_sealed_for_another_delivery_is_refused() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-SWAP").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    deliver(&app, &agent, delivery_id).await;

    // Authentic under the server key, but addressed to a different delivery.
    let foreign = DeliveryCodePayload::new(Uuid::new_v4(), order_id, client.id);
    let swapped_code = reseal_stored_code(&app, delivery_id, &foreign).await;

    let err = app
        .state
        .services
        .deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest { code: swapped_code },
        )
        .await
        .expect_err("swapped code");
    assert_matches!(
        err,
        ServiceError::InvalidCode(ref msg) if msg.contains("does not match this delivery")
    );
}

#[tokio::test]
async fn manager_confirmation_closes_the_handshake_and_the_order() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-CONF").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    let deliveries = &app.state.services.deliveries;

    // Confirmation cannot jump the client verification step.
    deliver(&app, &agent, delivery_id).await;
    let err = deliveries
        .confirm_by_manager(delivery_id, &app.auth_user(&manager))
        .await
        .expect_err("client has not verified yet");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("DELIVERED"));

    let code = delivery_row(&app, delivery_id).await.delivery_code;
    deliveries
        .verify_by_client(
            delivery_id,
            &app.auth_user(&client),
            VerifyDeliveryRequest { code },
        )
        .await
        .expect("verify");

    // Agents cannot confirm.
    let err = deliveries
        .confirm_by_manager(delivery_id, &app.auth_user(&agent))
        .await
        .expect_err("agents cannot confirm");
    assert_matches!(err, ServiceError::Forbidden(_));

    let confirmed = deliveries
        .confirm_by_manager(delivery_id, &app.auth_user(&manager))
        .await
        .expect("confirm");
    assert_eq!(confirmed.status, "MANAGER_CONFIRMED");
    assert!(confirmed.manager_confirmed_at.is_some());

    // The order lands with the delivery.
    let order = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(order.status, OrderStatus::Delivered);
    let row = delivery_row(&app, delivery_id).await;
    assert_eq!(row.manager_confirmed_by, Some(manager.id));

    // Terminal; confirming twice fails.
    let err = deliveries
        .confirm_by_manager(delivery_id, &app.auth_user(&manager))
        .await
        .expect_err("already confirmed");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("MANAGER_CONFIRMED"));
}

#[tokio::test]
async fn the_short_code_is_spoken_digits_for_the_assigned_agent() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-SHORT").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    let deliveries = &app.state.services.deliveries;

    let short = deliveries
        .short_code(delivery_id, &app.auth_user(&agent))
        .await
        .expect("short code");
    assert_eq!(short.short_code.len(), 6);
    assert!(short.short_code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(short.short_code, codes::short_code(delivery_id, order_id));

    // Nobody else gets it, not even the manager who assigned the run.
    for account in [&client, &manager] {
        let err = deliveries
            .short_code(delivery_id, &app.auth_user(account))
            .await
            .expect_err("agent only");
        assert_matches!(err, ServiceError::Forbidden(_));
    }
}

#[tokio::test]
async fn deliveries_are_scoped_by_role() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;
    let agent = app.seed_agent("agent@delivery.test").await;
    let other_agent = app.seed_agent("bystander@delivery.test").await;
    let other_client = app.seed_client("bystander-client@delivery.test").await;

    let order_id = paid_order(&app, &client, &manager, &admin, "DLV-SCOPE").await;
    let delivery_id = assign(&app, &manager, order_id, agent.id)
        .await
        .expect("assign");
    let deliveries = &app.state.services.deliveries;

    // The assigned agent and the ordering client can read it.
    deliveries
        .get_delivery(delivery_id, &app.auth_user(&agent))
        .await
        .expect("assigned agent reads");
    deliveries
        .get_delivery(delivery_id, &app.auth_user(&client))
        .await
        .expect("ordering client reads");

    // Everyone else sees nothing, not even existence.
    assert_matches!(
        deliveries
            .get_delivery(delivery_id, &app.auth_user(&other_agent))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        deliveries
            .get_delivery(delivery_id, &app.auth_user(&other_client))
            .await,
        Err(ServiceError::NotFound(_))
    );

    // Listings follow the same scoping.
    let mine = deliveries
        .list_deliveries(&app.auth_user(&agent), None, 1, 20)
        .await
        .expect("agent list");
    assert_eq!(mine.total, 1);
    let theirs = deliveries
        .list_deliveries(&app.auth_user(&other_agent), None, 1, 20)
        .await
        .expect("other agent list");
    assert_eq!(theirs.total, 0);
    let managers_view = deliveries
        .list_deliveries(&app.auth_user(&manager), None, 1, 20)
        .await
        .expect("manager list");
    assert_eq!(managers_view.total, 1);
}

#[tokio::test]
async fn payment_confirmation_is_admin_only_and_single_use() {
    let app = TestApp::new().await;
    let client = app.seed_client("hotel@delivery.test").await;
    let manager = app.seed_manager("manager@delivery.test").await;
    let admin = app.seed_admin("admin@delivery.test").await;

    let order_id = order_via_quote(&app, &client, &manager, "DLV-ADMIN").await;
    let orders = &app.state.services.orders;

    let err = orders
        .confirm_payment(order_id, &app.auth_user(&manager))
        .await
        .expect_err("managers cannot confirm payment");
    assert_matches!(err, ServiceError::Forbidden(_));

    let confirmed = orders
        .confirm_payment(order_id, &app.auth_user(&admin))
        .await
        .expect("admin confirms");
    assert_eq!(confirmed.status, "PAID");
    assert_eq!(confirmed.payment_status, "CONFIRMED");

    let err = orders
        .confirm_payment(order_id, &app.auth_user(&admin))
        .await
        .expect_err("payment is confirmed once");
    assert_matches!(err, ServiceError::Conflict(ref msg) if msg.contains("already confirmed"));
}
