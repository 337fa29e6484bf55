//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pitwall_core::auth::{hash_password, mint_token, Claims};
use pitwall_core::schema::FormRegistry;
use pitwall_core::serial::SerialConfig;
use pitwall_core::Role;
use tokio::sync::watch;
use tower::ServiceExt;

use pitwall_daemon::http::{router, AppState, AuthConfig};
use pitwall_daemon::hub::TelemetryHub;
use pitwall_daemon::source::{SerialTelemetry, SourceManager};
use pitwall_daemon::store::Store;
use pitwall_daemon::values::ValueService;

pub const JWT_SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";

pub const DAQ_FORM: &str = r#"
form_name: daq_setup
role: DAQ
fields:
  - name: sampling_rate
    label: Sampling Rate
    type: number
    required: true
    unit: Hz
    lookback: true
    validity_window: 3600
    inject: Sampling Rate
  - name: logger_notes
    label: Logger Notes
    type: textarea
  - name: can_termination
    label: CAN Termination
    type: select
    options: ["on", "off"]
"#;

pub const AERO_FORM: &str = r#"
form_name: aero_setup
role: aero
fields:
  - name: front_wing_angle
    label: Front Wing Angle
    type: number
    unit: deg
"#;

/// A fully wired application over an in-memory store.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Store,
    _forms_dir: tempfile::TempDir,
    _shutdown_tx: watch::Sender<bool>,
}

pub async fn spawn_app() -> TestApp {
    let store = Store::open_in_memory().expect("open store");
    store.seed_default_sensors().expect("seed sensors");

    let forms_dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(forms_dir.path().join("daq.yaml"), DAQ_FORM).expect("write form");
    std::fs::write(forms_dir.path().join("aero.yaml"), AERO_FORM).expect("write form");
    let registry = Arc::new(RwLock::new(
        FormRegistry::load(forms_dir.path()).expect("load registry"),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = Arc::new(TelemetryHub::new());
    let serial = SerialTelemetry::spawn(SerialConfig::default(), shutdown_rx);
    let sources = Arc::new(SourceManager::new(store.clone(), Arc::clone(&hub), serial));

    let state = AppState {
        store: store.clone(),
        registry,
        values: Arc::new(ValueService::new(store.clone())),
        hub,
        sources,
        auth: Arc::new(AuthConfig {
            jwt_secret: JWT_SECRET.to_vec(),
            token_ttl: Duration::from_secs(3600),
        }),
    };
    let app = router(state.clone(), &["http://localhost:5173".to_string()]);
    TestApp {
        app,
        state,
        store,
        _forms_dir: forms_dir,
        _shutdown_tx: shutdown_tx,
    }
}

impl TestApp {
    /// Creates a user directly in the store and returns a valid token.
    pub fn create_user(&self, username: &str, password: &str, is_admin: bool, roles: &[Role]) -> String {
        let hash = hash_password(password).expect("hash");
        let user = self
            .store
            .create_user(username, &hash, is_admin, roles)
            .expect("create user");
        let now = chrono::Utc::now().timestamp() as u64;
        mint_token(
            JWT_SECRET,
            &Claims {
                sub: user.username,
                uid: user.id,
                is_admin,
                roles: roles.to_vec(),
                exp: now + 3600,
            },
        )
    }

    pub fn admin_token(&self) -> String {
        self.create_user("race_admin", "paddock42!", true, &[])
    }

    /// Sends a request and returns (status, parsed JSON body).
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    /// Form-encoded login request.
    pub async fn login(&self, username: &str, password: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "username={username}&password={password}"
            )))
            .expect("request");
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
