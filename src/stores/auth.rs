//! Login state for the download server
//!
//! ## Flow
//! ```text
//! GET  /api/auth/status   -> {"authentication_enabled": bool}
//! POST /api/auth/verify   (Authorization: Bearer <token>)
//! POST /api/auth/login    {"username","password"} -> {"access_token","username",...}
//! ```
//!
//! Tokens are only decoded locally to read `exp`; the server is the one that
//! checks the signature.

use std::sync::Arc;

use jsonwebtoken::{decode, DecodingKey, Validation};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::Store;
use crate::config::{ConfigError, StreamConfig};

/// Header carrying the lockout seconds on a 429 login response
pub const RATE_LIMIT_HEADER: &str = "X-RateLimit-Remaining-Time";

/// Username shown when the server runs without authentication
pub const ANONYMOUS: &str = "anonymous";

/// Claims read from a stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.exp
    }
}

/// Decode the claims of `token` without checking its signature
pub fn read_claims(token: &str) -> Option<Claims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// True when `token` is a JWT whose `exp` lies in the future
pub fn token_is_valid(token: &str) -> bool {
    read_claims(token).is_some_and(|claims| !claims.is_expired())
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{detail}")]
    RateLimited {
        detail: String,
        remaining_secs: Option<u64>,
    },

    #[error("login rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

/// Token and username persisted between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub username: String,
}

/// Where credentials survive between runs
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credentials>;
    fn save(&self, credentials: &Credentials);
    fn clear(&self);
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: Mutex<Option<Credentials>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: Credentials) -> Self {
        Self {
            inner: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn load(&self) -> Option<Credentials> {
        self.inner.lock().clone()
    }

    fn save(&self, credentials: &Credentials) {
        *self.inner.lock() = Some(credentials.clone());
    }

    fn clear(&self) {
        *self.inner.lock() = None;
    }
}

/// Observable authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub authenticated: bool,
    pub token: Option<String>,
    pub username: Option<String>,
    pub loading: bool,
    /// Whether the server enforces authentication
    pub required: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            authenticated: false,
            token: None,
            username: None,
            loading: true,
            required: false,
        }
    }
}

impl AuthState {
    pub fn needs_login(&self) -> bool {
        self.required && !self.authenticated && !self.loading
    }
}

/// Successful login body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub username: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    authentication_enabled: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Authentication manager
pub struct AuthStore {
    http: reqwest::Client,
    config: StreamConfig,
    credentials: Arc<dyn CredentialStore>,
    state: Store<AuthState>,
}

impl AuthStore {
    pub fn new(
        http: reqwest::Client,
        config: StreamConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
            state: Store::create(AuthState::default()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.get()
    }

    pub fn store(&self) -> Store<AuthState> {
        self.state.clone()
    }

    pub fn needs_login(&self) -> bool {
        self.state.get().needs_login()
    }

    /// Work out whether login is needed and restore a stored session
    ///
    /// If the status request fails the server is assumed to run without
    /// authentication.
    pub async fn initialize(&self) -> AuthState {
        self.state.update(|s| s.loading = true);

        match self.fetch_status().await {
            Ok(false) => self.state.update(|s| {
                s.required = false;
                s.authenticated = true;
                s.username = Some(ANONYMOUS.to_string());
            }),
            Ok(true) => {
                self.state.update(|s| s.required = true);
                self.restore_session().await;
            }
            Err(e) => {
                warn!(error = %e, "Auth status check failed, continuing without authentication");
                self.state.update(|s| {
                    s.required = false;
                    s.authenticated = true;
                });
            }
        }

        self.state.update(|s| s.loading = false);
        self.state.get()
    }

    async fn fetch_status(&self) -> Result<bool, AuthError> {
        let url = self.config.endpoint("/api/auth/status")?;
        let status: StatusResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status.authentication_enabled)
    }

    async fn restore_session(&self) {
        let stored = match self.credentials.load() {
            Some(stored) if token_is_valid(&stored.token) => stored,
            _ => {
                self.logout();
                return;
            }
        };

        match self.verify(&stored.token).await {
            Ok(true) => {
                info!(username = %stored.username, "Restored session");
                self.state.update(|s| {
                    s.token = Some(stored.token);
                    s.username = Some(stored.username);
                    s.authenticated = true;
                });
            }
            Ok(false) => self.logout(),
            Err(e) => {
                warn!(error = %e, "Token verification failed");
                self.logout();
            }
        }
    }

    async fn verify(&self, token: &str) -> Result<bool, AuthError> {
        let url = self.config.endpoint("/api/auth/verify")?;
        let response = self.http.post(url).bearer_auth(token).send().await?;
        Ok(response.status().is_success())
    }

    /// Log in and persist the returned token
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let url = self.config.endpoint("/api/auth/login")?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let login: LoginResponse = response.json().await?;
            self.credentials.save(&Credentials {
                token: login.access_token.clone(),
                username: login.username.clone(),
            });
            self.state.update(|s| {
                s.token = Some(login.access_token.clone());
                s.username = Some(login.username.clone());
                s.authenticated = true;
            });
            info!(username = %login.username, "Logged in");
            return Ok(login);
        }

        let remaining_secs = response
            .headers()
            .get(RATE_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let detail = error_detail(status, response.json::<Value>().await.ok());

        warn!(status = status.as_u16(), %detail, "Login failed");
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(AuthError::RateLimited {
                detail,
                remaining_secs,
            })
        } else {
            Err(AuthError::Rejected {
                status: status.as_u16(),
                detail,
            })
        }
    }

    /// Forget the session
    pub fn logout(&self) {
        self.credentials.clear();
        self.state.update(|s| {
            s.token = None;
            s.username = None;
            s.authenticated = false;
        });
    }

    /// `Authorization` header for the stored token, if any
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(stored) = self.credentials.load() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", stored.token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Request builder for a server path carrying the stored token
    pub fn authenticated_request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder, AuthError> {
        let url = self.config.endpoint(path)?;
        Ok(self.http.request(method, url).headers(self.auth_headers()))
    }
}

fn error_detail(status: StatusCode, body: Option<Value>) -> String {
    body.as_ref()
        .and_then(|b| b.get("detail"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}
