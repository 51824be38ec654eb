// Shared harness for the integration test binaries. Not every binary uses
// every helper, so dead_code is allowed module-wide.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware, Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use supplyline_api::{
    auth::{hash_password, AuthConfig, AuthService, AuthUser},
    config::AppConfig,
    db,
    entities::{
        product,
        user::{self, UserRole},
    },
    events::{self, EventSender},
    handlers::AppServices,
    services::codes::CodeKey,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Secret the harness derives the verification-code key from; tests that
/// reseal codes must use the same one.
pub const TEST_CODE_SECRET: &str = "itest-code-secret-abcdefgh-0123456789";

pub const TEST_PASSWORD: &str = "integration-test-password";

/// Helper harness for spinning up an application state backed by a
/// throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    auth_service: Arc<AuthService>,
    password_hash: String,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = TempDir::new().expect("create temp dir for test database");
        let db_path = db_dir.path().join("supplyline_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "itest_signing_secret_0123456789_abcdefghij".to_string(),
            TEST_CODE_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_cfg = AuthConfig::new(
            cfg.jwt_secret.clone(),
            Duration::from_secs(cfg.jwt_expiration),
        );
        let auth_service = Arc::new(AuthService::new(auth_cfg, db_arc.clone()));

        let code_key = CodeKey::derive(&cfg.delivery_code_secret);
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), code_key);

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let api_router = supplyline_api::api_v1_routes().layer(middleware::from_fn_with_state(
            auth_service.clone(),
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: Request<Body>,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ));

        let router = Router::new()
            .nest("/api/v1", api_router)
            .nest(
                "/auth",
                supplyline_api::auth::auth_routes().with_state(auth_service.clone()),
            )
            .with_state(state.clone());

        // Hash once; all seeded accounts share the test password.
        let password_hash = hash_password(TEST_PASSWORD).expect("hash test password");

        Self {
            router,
            state,
            auth_service,
            password_hash,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Insert an account with the given role and return its model.
    pub async fn seed_user(&self, name: &str, email: &str, role: UserRole) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(self.password_hash.clone()),
            role: Set(role),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user for tests")
    }

    pub async fn seed_client(&self, email: &str) -> user::Model {
        self.seed_user("Test Client", email, UserRole::Client).await
    }

    pub async fn seed_manager(&self, email: &str) -> user::Model {
        self.seed_user("Test Manager", email, UserRole::Manager)
            .await
    }

    pub async fn seed_agent(&self, email: &str) -> user::Model {
        self.seed_user("Test Agent", email, UserRole::Agent).await
    }

    pub async fn seed_admin(&self, email: &str) -> user::Model {
        self.seed_user("Test Admin", email, UserRole::Admin).await
    }

    /// Insert an active catalog product.
    pub async fn seed_product(&self, name: &str, sku: &str, unit: &str) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            unit: Set(unit.to_string()),
            description: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    /// The caller identity services expect, without going through HTTP.
    pub fn auth_user(&self, account: &user::Model) -> AuthUser {
        AuthUser {
            user_id: account.id,
            role: account.role,
            name: account.name.clone(),
            email: account.email.clone(),
        }
    }

    /// Mint a bearer token for the account, as login would.
    pub fn token_for(&self, account: &user::Model) -> String {
        self.auth_service
            .generate_token(account)
            .expect("generate token for tests")
            .access_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for JSON requests on behalf of a seeded account.
    pub async fn request_as(
        &self,
        account: &user::Model,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let token = self.token_for(account);
        self.request(method, uri, body, Some(&token)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decode a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
