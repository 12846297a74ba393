#![cfg(not(tarpaulin_include))]

use crate::config::AdminConfig;
use crate::dataset::Owner;
use crate::error::{Error, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{FromRef, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";
pub const UNAUTHENTICATED: &str = "Authentication credentials were not provided.";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// User data structure representing a registered application user
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    #[serde(default)]
    pub is_admin: bool,
}

/// Credential data for login and registration
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,

    /// Email address (optional for login, required for registration)
    #[serde(default)]
    pub email: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// Registered users, persisted as pretty JSON
pub struct UserRegistry {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

impl UserRegistry {
    /// Load the users file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                Error::storage(
                    format!("parse {}", path.display()),
                    io::Error::new(io::ErrorKind::InvalidData, e),
                )
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::storage(format!("read {}", path.display()), e)),
        };
        Ok(UserRegistry {
            path,
            users: RwLock::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a new user
    ///
    /// # Errors
    /// * `Auth` if a field is empty or the username or email is already in use
    /// * `StorageIo` if the users file cannot be written
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<()> {
        self.insert(username, email, password, false)
    }

    fn insert(&self, username: &str, email: &str, password: &str, is_admin: bool) -> Result<()> {
        if username.trim().is_empty() || password.is_empty() || email.trim().is_empty() {
            return Err(Error::Auth(
                "Username, email and password cannot be empty".to_string(),
            ));
        }
        let password_hash = hash_password(password)?;

        let mut users = self.write_users();
        if users.contains_key(username) {
            return Err(Error::Auth("Username already exists".to_string()));
        }
        if users.values().any(|user| user.email == email) {
            return Err(Error::Auth("Email address is already registered".to_string()));
        }

        users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                is_admin,
            },
        );
        if let Err(e) = self.save(&users) {
            users.remove(username);
            return Err(e);
        }
        log::info!("registered user {}", username);
        Ok(())
    }

    /// Check a username and password; unknown users simply fail to verify
    pub fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let hash = match self.read_users().get(username) {
            Some(user) => user.password_hash.clone(),
            None => return Ok(false),
        };
        verify_password(password, &hash)
    }

    /// Create the administrator account if no administrator exists
    ///
    /// An existing user with the configured name is promoted instead.
    /// Returns whether anything changed.
    pub fn ensure_admin(&self, admin: &AdminConfig) -> Result<bool> {
        admin.validate()?;
        {
            let mut users = self.write_users();
            if users.values().any(|user| user.is_admin) {
                return Ok(false);
            }
            if let Some(user) = users.get_mut(&admin.username) {
                user.is_admin = true;
                if let Err(e) = self.save(&users) {
                    if let Some(user) = users.get_mut(&admin.username) {
                        user.is_admin = false;
                    }
                    return Err(e);
                }
                log::info!("promoted {} to administrator", admin.username);
                return Ok(true);
            }
        }
        self.insert(&admin.username, &admin.email, &admin.password, true)?;
        log::info!("created administrator {}", admin.username);
        Ok(true)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.read_users()
            .get(username)
            .is_some_and(|user| user.is_admin)
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<()> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| Error::storage("serialize users", io::Error::other(e)))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("create {}", parent.display()), e))?;
        }
        fs::write(&self.path, json)
            .map_err(|e| Error::storage(format!("write {}", self.path.display()), e))
    }

    fn read_users(&self) -> RwLockReadGuard<'_, HashMap<String, User>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_users(&self) -> RwLockWriteGuard<'_, HashMap<String, User>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hash a password using Argon2id with a random salt
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::Auth("Password hashing failed".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| Error::Auth("Invalid password hash format".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    pub owner: Owner,
    pub expires_at: SystemTime,
}

/// Active sessions keyed by session id
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(SESSION_DURATION))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Start a session and return its id
    pub fn create(&self, owner: &Owner) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(
            session_id.clone(),
            Session {
                owner: owner.clone(),
                expires_at: now + self.ttl,
            },
        );
        session_id
    }

    /// The owner of a live session
    pub fn validate(&self, session_id: &str) -> Option<Owner> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .get(session_id)
            .filter(|session| session.expires_at > SystemTime::now())
            .map(|session| session.owner.clone())
    }

    pub fn revoke(&self, session_id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
    }
}

/// Authentication collaborators shared with the handlers
#[derive(Clone)]
pub struct Auth {
    pub users: Arc<UserRegistry>,
    pub sessions: Arc<SessionStore>,
}

impl Auth {
    async fn verify(&self, username: String, password: String) -> Result<bool> {
        let users = self.users.clone();
        tokio::task::spawn_blocking(move || users.verify(&username, &password))
            .await
            .map_err(|e| Error::Auth(format!("credential check failed: {}", e)))?
    }
}

pub fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// `username:password` from an `Authorization: Basic` header
fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Authentication middleware
///
/// Accepts a live `session` cookie or HTTP Basic credentials and inserts the
/// caller's [`Owner`] into the request extensions. Anything else gets a 401.
pub async fn require_auth<S>(
    State(state): State<S>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response
where
    S: Clone + Send + Sync + 'static,
    Auth: FromRef<S>,
{
    let auth = Auth::from_ref(&state);

    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        if let Some(owner) = auth.sessions.validate(session_cookie.value()) {
            request.extensions_mut().insert(owner);
            return next.run(request).await;
        }
    }

    if let Some((username, password)) = basic_credentials(&request) {
        match auth.verify(username.clone(), password).await {
            Ok(true) => {
                request.extensions_mut().insert(Owner::new(username));
                return next.run(request).await;
            }
            Ok(false) => return unauthorized("Invalid username or password."),
            Err(e) => {
                log::error!("credential check for {} failed: {}", username, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response();
            }
        }
    }

    unauthorized(UNAUTHENTICATED)
}

/// Handle user login requests
///
/// Validates credentials and sets a session cookie if they match.
pub async fn handle_login(
    State(auth): State<Auth>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Response {
    match auth
        .verify(credentials.username.clone(), credentials.password)
        .await
    {
        Ok(true) => {
            let owner = Owner::new(credentials.username.as_str());
            let session_id = auth.sessions.create(&owner);
            let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
            cookie.set_path("/");
            cookie.set_http_only(true);
            log::info!("{} logged in", owner);
            (
                jar.add(cookie),
                Json(serde_json::json!({ "username": owner.as_str() })),
            )
                .into_response()
        }
        Ok(false) => unauthorized("Invalid username or password."),
        Err(e) => {
            log::error!("login for {} failed: {}", credentials.username, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response()
        }
    }
}

/// Handle user logout: forget the session and clear the cookie
pub async fn handle_logout(State(auth): State<Auth>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        auth.sessions.revoke(cookie.value());
    }
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    (jar.remove(cookie), StatusCode::NO_CONTENT)
}

/// Handle user registration
pub async fn handle_register(
    State(auth): State<Auth>,
    Json(credentials): Json<UserCredentials>,
) -> Response {
    let users = auth.users.clone();
    let username = credentials.username.clone();
    let result = tokio::task::spawn_blocking(move || {
        users.register(
            &credentials.username,
            &credentials.email,
            &credentials.password,
        )
    })
    .await;

    match result {
        Ok(Ok(())) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "username": username })),
        )
            .into_response(),
        Ok(Err(Error::Auth(message))) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response(),
        Ok(Err(e)) => {
            log::error!("registering {} failed: {}", username, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Registration error").into_response()
        }
        Err(e) => {
            log::error!("registering {} failed: {}", username, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Registration error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AdminConfig {
        AdminConfig {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "changeme123".to_string(),
        }
    }

    #[test]
    fn register_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserRegistry::open(dir.path().join("users.json")).unwrap();
        users.register("alice", "alice@example.com", "s3cret").unwrap();

        assert!(users.verify("alice", "s3cret").unwrap());
        assert!(!users.verify("alice", "wrong").unwrap());
        assert!(!users.verify("bob", "s3cret").unwrap());

        let reopened = UserRegistry::open(users.path()).unwrap();
        assert!(reopened.verify("alice", "s3cret").unwrap());
    }

    #[test]
    fn duplicate_username_or_email_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserRegistry::open(dir.path().join("users.json")).unwrap();
        users.register("alice", "alice@example.com", "pw").unwrap();

        assert!(matches!(
            users.register("alice", "other@example.com", "pw"),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            users.register("bob", "alice@example.com", "pw"),
            Err(Error::Auth(_))
        ));
        assert!(matches!(users.register("", "x@example.com", "pw"), Err(Error::Auth(_))));
    }

    #[test]
    fn ensure_admin_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserRegistry::open(dir.path().join("users.json")).unwrap();

        assert!(users.ensure_admin(&admin()).unwrap());
        assert!(users.is_admin("admin"));
        assert!(users.verify("admin", "changeme123").unwrap());
        assert!(!users.ensure_admin(&admin()).unwrap());
    }

    #[test]
    fn ensure_admin_promotes_existing_user() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserRegistry::open(dir.path().join("users.json")).unwrap();
        users.register("admin", "ops@example.com", "kept").unwrap();

        assert!(users.ensure_admin(&admin()).unwrap());
        assert!(users.is_admin("admin"));
        assert!(users.verify("admin", "kept").unwrap());
    }

    #[test]
    fn sessions_expire_and_revoke() {
        let sessions = SessionStore::new();
        let owner = Owner::new("alice");
        let id = sessions.create(&owner);
        assert_eq!(sessions.validate(&id), Some(owner));

        sessions.revoke(&id);
        assert_eq!(sessions.validate(&id), None);

        let expired = SessionStore::with_ttl(Duration::ZERO);
        let id = expired.create(&Owner::new("bob"));
        assert_eq!(expired.validate(&id), None);
        assert_eq!(sessions.validate("not-a-session"), None);
    }
}
