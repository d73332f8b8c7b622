//! Admin authentication
//!
//! Administrators are configured up front (`RABINDRA_ADMINS`); there is no
//! registration. A successful login stores a session in the
//! [`SessionStore`] held by the application state and hands the browser a
//! `session` cookie.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use argon2::{
    Algorithm, Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use axum::{
    Form,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::app::{AppError, AppState};
use crate::config::{AdminAccount, MAX_SESSION_TTL};
use crate::view::{Mode, PageContext};

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("stored password hash for {username} is malformed: {reason}")]
    MalformedHash { username: String, reason: String },
}

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id,
/// in PHC string format.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, AuthError>` - The password hash or an error
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify a password against a stored hash
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored PHC hash to check against
///
/// # Returns
/// * `Result<bool, String>` - True if the password matches, false if not,
///   or the reason the hash could not be parsed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = parse_password_hash(hash)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

/// Parse a stored PHC string that argon2 can verify against
///
/// A hash without salt or digest, or for another algorithm, would never
/// match any password; it is reported instead.
pub fn parse_password_hash(hash: &str) -> Result<PasswordHash<'_>, String> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| e.to_string())?;
    Algorithm::try_from(parsed_hash.algorithm).map_err(|e| e.to_string())?;
    if parsed_hash.salt.is_none() || parsed_hash.hash.is_none() {
        return Err("hash has no salt or digest".to_string());
    }
    Ok(parsed_hash)
}

/// Decides whether a username/password pair may enter the admin area
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError>;

    /// False when nobody could ever log in
    fn has_accounts(&self) -> bool {
        true
    }
}

/// Accounts taken from the configuration
#[derive(Debug, Default, Clone)]
pub struct ConfiguredCredentials {
    accounts: HashMap<String, String>,
}

impl ConfiguredCredentials {
    pub fn new(accounts: &[AdminAccount]) -> Self {
        ConfiguredCredentials {
            accounts: accounts
                .iter()
                .map(|account| (account.username.clone(), account.password_hash.clone()))
                .collect(),
        }
    }
}

impl CredentialVerifier for ConfiguredCredentials {
    fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let Some(hash) = self.accounts.get(username.trim()) else {
            return Ok(false);
        };
        verify_password(password, hash).map_err(|reason| AuthError::MalformedHash {
            username: username.trim().to_string(),
            reason,
        })
    }

    fn has_accounts(&self) -> bool {
        !self.accounts.is_empty()
    }
}

/// An authenticated admin session
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: SystemTime,
}

/// Active sessions keyed by session id
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// Sessions last `ttl`, capped at [`MAX_SESSION_TTL`] seconds
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl: ttl.min(Duration::from_secs(MAX_SESSION_TTL)),
        }
    }

    /// Start a session for `username` and return its id
    pub fn create(&self, username: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            username: username.to_string(),
            expires_at: SystemTime::now() + self.ttl,
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), session);

        session_id
    }

    /// The username behind a live session
    pub fn validate(&self, session_id: &str) -> Option<String> {
        self.validate_at(session_id, SystemTime::now())
    }

    pub fn validate_at(&self, session_id: &str, now: SystemTime) -> Option<String> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .filter(|session| session.expires_at > now)
            .map(|session| session.username.clone())
    }

    /// End a session; returns whether it existed
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    /// Drop expired sessions and return how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(SystemTime::now())
    }

    pub fn purge_expired_at(&self, now: SystemTime) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Username of the signed-in admin, if the cookie carries a live session
pub fn current_admin(state: &AppState, jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.validate(cookie.value()))
}

/// Set on requests that passed [`require_admin`]
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

/// Credential data from the login form
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

#[derive(Serialize)]
struct LoginBody {
    username: String,
    accounts_configured: bool,
}

fn render_login(
    state: &AppState,
    username: &str,
    flash: Option<String>,
) -> Result<Html<String>, AppError> {
    let body = LoginBody {
        username: username.to_string(),
        accounts_configured: state.credentials.has_accounts(),
    };
    let context = PageContext::new("Admin login", Mode::Admin, body).with_flash(flash);
    Ok(Html(state.views.render("login", &context)?))
}

/// Serve the login page, or skip it when already signed in
pub async fn serve_login_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    if current_admin(&state, &jar).is_some() {
        return Ok(Redirect::to("/admin").into_response());
    }
    Ok(render_login(&state, "", query.error)?.into_response())
}

/// Handle admin login requests
///
/// Verifies the submitted credentials and, when they match a configured
/// account, creates a session and redirects to the admin page.
///
/// # Returns
/// * `Response` - Redirect with the session cookie, or the login page with
///   a 401 status
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Result<Response, AppError> {
    let username = credentials.username.trim();

    match state.credentials.verify(username, &credentials.password) {
        Ok(true) => {
            let session_id = state.sessions.create(username);
            tracing::info!(username, "admin signed in");
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .build();
            Ok((jar.add(cookie), Redirect::to("/admin")).into_response())
        }
        Ok(false) => {
            tracing::warn!(username, "failed admin login");
            let page = render_login(
                &state,
                username,
                Some("Invalid username or password".to_string()),
            )?;
            Ok((StatusCode::UNAUTHORIZED, page).into_response())
        }
        Err(error) => Err(AppError::Internal(error.to_string())),
    }
}

/// Handle admin logout
///
/// Ends the session, clears the cookie and returns to the home page.
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.revoke(cookie.value()) {
            tracing::info!("admin signed out");
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/"))
}

/// Authentication middleware for the admin routes
///
/// Passes the request through with an [`AdminUser`] extension when the
/// session cookie is valid and redirects to the login page otherwise.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match current_admin(&state, &jar) {
        Some(username) => {
            request.extensions_mut().insert(AdminUser(username));
            next.run(request).await
        }
        None => Redirect::to("/login").into_response(),
    }
}
