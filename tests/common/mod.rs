// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storefront_auth::config::Config;
use storefront_auth::db::{AccountStore, FirestoreDb, MemoryDb};
use storefront_auth::models::{Account, NewAccount};
use storefront_auth::routes::create_router;
use storefront_auth::services::keycloak::{
    IdentityProvider, IdpError, IdpNewUser, IdpTokens, IdpUserInfo,
};
use storefront_auth::services::{DisabledBotCheck, LegacyPasswordHasher, LogMailer};
use storefront_auth::{AppState, Backends, Collaborators};
use tower::ServiceExt; // for oneshot
use uuid::Uuid;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// How the fake identity provider answers.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpBehavior {
    Up,
    /// Connection refused on every call
    Down,
    /// Every call times out
    Timeout,
}

#[derive(Clone)]
struct FakeUser {
    id: Uuid,
    username: String,
    password: String,
}

#[derive(Default)]
struct FakeState {
    users: HashMap<String, FakeUser>,
    /// access token -> email
    access: HashMap<String, String>,
    /// refresh token -> email
    refresh: HashMap<String, String>,
}

/// Scripted in-process identity provider.
pub struct FakeIdp {
    state: Mutex<FakeState>,
    behavior: Mutex<IdpBehavior>,
    issued: AtomicUsize,
    pub password_grants: AtomicUsize,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub logouts: AtomicUsize,
}

#[allow(dead_code)]
impl FakeIdp {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            behavior: Mutex::new(IdpBehavior::Up),
            issued: AtomicUsize::new(0),
            password_grants: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: IdpBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn add_user(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.insert(
            email.to_string(),
            FakeUser {
                id,
                username: email.split('@').next().unwrap_or_default().to_string(),
                password: password.to_string(),
            },
        );
        id
    }

    pub fn user_id(&self, email: &str) -> Option<Uuid> {
        self.state.lock().unwrap().users.get(email).map(|u| u.id)
    }

    pub fn live_refresh_tokens(&self) -> usize {
        self.state.lock().unwrap().refresh.len()
    }

    fn check(&self) -> Result<(), IdpError> {
        match *self.behavior.lock().unwrap() {
            IdpBehavior::Up => Ok(()),
            IdpBehavior::Down => Err(IdpError::Transport("connection refused".to_string())),
            IdpBehavior::Timeout => Err(IdpError::Timeout),
        }
    }

    fn issue(&self, state: &mut FakeState, email: &str) -> IdpTokens {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let access_token = format!("at-{}", n);
        let refresh_token = format!("rt-{}", n);
        state.access.insert(access_token.clone(), email.to_string());
        state.refresh.insert(refresh_token.clone(), email.to_string());
        IdpTokens {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: 300,
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdp {
    async fn password_grant(&self, username: &str, password: &str) -> Result<IdpTokens, IdpError> {
        self.password_grants.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut state = self.state.lock().unwrap();
        match state.users.get(username) {
            Some(user) if user.password == password => Ok(self.issue(&mut state, username)),
            _ => Err(IdpError::InvalidGrant),
        }
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<IdpTokens, IdpError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        match state.refresh.remove(refresh_token) {
            Some(email) => Ok(self.issue(&mut state, &email)),
            None => Err(IdpError::InvalidGrant),
        }
    }

    async fn userinfo(&self, access_token: &str) -> Result<IdpUserInfo, IdpError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let email = state.access.get(access_token).ok_or(IdpError::InvalidGrant)?;
        let user = state.users.get(email).ok_or(IdpError::NotFound)?;
        Ok(IdpUserInfo {
            sub: user.id,
            email: Some(email.clone()),
            preferred_username: Some(user.username.clone()),
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), IdpError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.state.lock().unwrap().refresh.remove(refresh_token);
        Ok(())
    }

    async fn create_user(&self, user: &IdpNewUser) -> Result<Uuid, IdpError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(&user.email) {
            return Err(IdpError::Conflict);
        }
        let id = Uuid::new_v4();
        state.users.insert(
            user.email.clone(),
            FakeUser {
                id,
                username: user.username.clone(),
                password: user.password.clone(),
            },
        );
        Ok(id)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, IdpError> {
        self.check()?;
        Ok(self.user_id(email))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), IdpError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.state.lock().unwrap().users.retain(|_, user| user.id != id);
        Ok(())
    }
}

/// Test app with in-memory storage and a fake identity provider.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: MemoryDb,
    pub idp: Arc<FakeIdp>,
}

/// Create a test app in hybrid mode.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default(), None)
}

/// Create a test app, optionally replacing the account store.
#[allow(dead_code)]
pub fn create_test_app_with(config: Config, accounts: Option<Arc<dyn AccountStore>>) -> TestApp {
    let db = MemoryDb::new();
    let idp = Arc::new(FakeIdp::new());

    let state = Arc::new(
        AppState::build(
            config,
            Backends {
                accounts: accounts.unwrap_or_else(|| Arc::new(db.clone())),
                audit: Arc::new(db.clone()),
                sessions: Arc::new(db.clone()),
            },
            Collaborators {
                idp: Some(idp.clone()),
                bot_check: Arc::new(DisabledBotCheck),
                mailer: Arc::new(LogMailer),
            },
        )
        .expect("Failed to build app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        idp,
    }
}

/// Insert an account carrying only a legacy PBKDF2 hash.
#[allow(dead_code)]
pub async fn seed_legacy_account(db: &MemoryDb, email: &str, password: &str) -> Account {
    let hasher = LegacyPasswordHasher::new(1_000);
    db.insert(NewAccount {
        username: email.split('@').next().unwrap_or_default().to_string(),
        email: email.to_string(),
        password_hash: hasher.hash(password).unwrap(),
        external_id: None,
    })
    .await
    .unwrap()
}

/// POST a JSON body from the given client IP.
#[allow(dead_code)]
pub async fn post_json(router: &axum::Router, uri: &str, body: Value, ip: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "integration-test")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// GET with an optional bearer token.
#[allow(dead_code)]
pub async fn get(router: &axum::Router, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    send(router, builder.body(Body::empty()).unwrap()).await
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
