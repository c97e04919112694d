//! Token/session manager: the only code that touches persisted credentials.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sipreciconts_core::{merge_patch, ApiError, User};
use sipreciconts_kv::KVStore;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{from_storage, from_transport};
use crate::events::{SessionEvent, SessionEvents};
use crate::pipeline::SESSION_HEADER;
use crate::token;

/// Persisted credential keys. The store handed to [`SessionManager`] is
/// expected to be scoped to one server origin already.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "auth:access_token";
    pub const REFRESH_TOKEN: &str = "auth:refresh_token";
    pub const SESSION_ID: &str = "auth:session_id";
    pub const USER: &str = "auth:user";
    /// RFC 3339 timestamp of when the running exchange started.
    pub const REFRESH_IN_PROGRESS: &str = "auth:refresh_in_progress";
    /// Set when a session ends involuntarily; read once by the login view.
    pub const SESSION_EXPIRED: &str = "auth:session_expired";

    /// Everything [`super::SessionManager::clear_all`] removes.
    pub const CREDENTIALS: [&str; 5] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        SESSION_ID,
        USER,
        REFRESH_IN_PROGRESS,
    ];
}

/// Body of a successful `POST /auth/login/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: User,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the server rotates refresh tokens.
    #[serde(default)]
    refresh: Option<String>,
}

/// Result of one refresh-token exchange, shared by every caller that
/// joined it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token is stored.
    Refreshed,
    /// The server rejected the refresh token. The session is gone.
    Rejected,
    /// Network or server trouble. The session is kept for a later attempt.
    Unavailable,
    /// There is nothing to exchange.
    NoRefreshToken,
}

/// Sole owner of credential persistence and validity.
///
/// At most one refresh exchange runs at a time. Callers that arrive while
/// one is in flight wait for it (bounded by `refresh_wait_timeout_ms`) and
/// receive its outcome instead of starting their own.
pub struct SessionManager {
    store: Arc<dyn KVStore>,
    config: ClientConfig,
    http: reqwest::Client,
    events: SessionEvents,
    /// In-memory mirror of `auth:user`.
    user: RwLock<Option<User>>,
    refresh_gate: tokio::sync::Mutex<()>,
    /// Bumped each time an exchange finishes; `last_outcome` belongs to it.
    generation: AtomicU64,
    last_outcome: Mutex<RefreshOutcome>,
    /// Serializes the check-and-clear in [`SessionManager::expire`].
    expiry: Mutex<()>,
}

impl SessionManager {
    /// Open the session over `store`.
    ///
    /// A partial session (only one of the two tokens present) is cleared,
    /// as is a refresh-in-progress flag left behind by a crashed process.
    pub fn new(store: Arc<dyn KVStore>, config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::internal(format!("http client: {e}")))?;

        let manager = Self {
            store,
            config,
            http,
            events: SessionEvents::new(),
            user: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: Mutex::new(RefreshOutcome::NoRefreshToken),
            expiry: Mutex::new(()),
        };
        manager.repair()?;
        manager.load_user()?;
        Ok(manager)
    }

    fn repair(&self) -> Result<(), ApiError> {
        let access = self.access_token()?;
        let refresh = self.refresh_token()?;
        if access.is_some() != refresh.is_some() {
            warn!(
                has_access = access.is_some(),
                has_refresh = refresh.is_some(),
                "partial session in storage, clearing"
            );
            self.clear_all()?;
        }
        if self.read(keys::REFRESH_IN_PROGRESS)?.is_some() && !self.is_refresh_in_progress() {
            warn!("stale refresh-in-progress flag, clearing");
            self.remove(keys::REFRESH_IN_PROGRESS)?;
        }
        Ok(())
    }

    fn load_user(&self) -> Result<(), ApiError> {
        let user = match self.read(keys::USER)? {
            Some(raw) => match serde_json::from_str::<User>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "cached user is unreadable, dropping it");
                    self.remove(keys::USER)?;
                    None
                }
            },
            None => None,
        };
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = user;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// HTTP client shared with the request pipeline.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    // ── Plain accessors ─────────────────────────────────────────────

    fn read(&self, key: &str) -> Result<Option<String>, ApiError> {
        self.store.get_string(key).map_err(from_storage)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), ApiError> {
        self.store.set_string(key, value).map_err(from_storage)
    }

    fn remove(&self, key: &str) -> Result<(), ApiError> {
        self.store.delete(key).map_err(from_storage)
    }

    pub fn access_token(&self) -> Result<Option<String>, ApiError> {
        self.read(keys::ACCESS_TOKEN)
    }

    pub fn set_access_token(&self, token: &str) -> Result<(), ApiError> {
        self.write(keys::ACCESS_TOKEN, token)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, ApiError> {
        self.read(keys::REFRESH_TOKEN)
    }

    pub fn set_refresh_token(&self, token: &str) -> Result<(), ApiError> {
        self.write(keys::REFRESH_TOKEN, token)
    }

    pub fn session_id(&self) -> Result<Option<String>, ApiError> {
        self.read(keys::SESSION_ID)
    }

    pub fn set_session_id(&self, id: &str) -> Result<(), ApiError> {
        self.write(keys::SESSION_ID, id)
    }

    /// Signed-in user, from the in-memory mirror.
    pub fn user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn company_id(&self) -> Option<String> {
        self.user()
            .and_then(|u| u.company_id)
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
    }

    pub fn has_session(&self) -> Result<bool, ApiError> {
        Ok(self.access_token()?.is_some() || self.refresh_token()?.is_some())
    }

    // ── Validity ────────────────────────────────────────────────────

    /// Token validity with the configured buffer. `None` checks the stored
    /// access token.
    pub fn is_token_valid(&self, token: Option<&str>) -> bool {
        match token {
            Some(t) => token::is_token_valid(Some(t), self.config.token_buffer_secs),
            None => {
                let stored = self.access_token().ok().flatten();
                token::is_token_valid(stored.as_deref(), self.config.token_buffer_secs)
            }
        }
    }

    /// `false` without a token, `true` with a valid one, otherwise the
    /// result of a refresh.
    pub async fn ensure_valid_token(&self) -> bool {
        match self.access_token() {
            Ok(Some(token)) if self.is_token_valid(Some(&token)) => true,
            Ok(Some(_)) => self.refresh_current_token().await,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "cannot read access token");
                false
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Persist a fresh login and announce it.
    pub fn establish(&self, login: LoginResponse) -> Result<(), ApiError> {
        self.set_access_token(&login.access)?;
        self.set_refresh_token(&login.refresh)?;
        match login.session_id.as_deref() {
            Some(id) => self.set_session_id(id)?,
            None => self.remove(keys::SESSION_ID)?,
        }
        self.store_user(login.user)?;
        self.remove(keys::SESSION_EXPIRED)?;
        info!("session established");
        self.events.emit(SessionEvent::SignedIn);
        Ok(())
    }

    fn store_user(&self, user: User) -> Result<(), ApiError> {
        let raw = serde_json::to_string(&user)
            .map_err(|e| ApiError::internal(format!("encode user: {e}")))?;
        self.write(keys::USER, &raw)?;
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
        Ok(())
    }

    /// Apply a partial profile update on top of the cached user.
    pub fn merge_user(&self, patch: &Value) -> Result<User, ApiError> {
        let current = self
            .user()
            .ok_or_else(|| ApiError::Unauthorized("no signed-in user".into()))?;
        let mut value = serde_json::to_value(&current)
            .map_err(|e| ApiError::internal(format!("encode user: {e}")))?;
        merge_patch(&mut value, patch);
        let merged: User = serde_json::from_value(value)
            .map_err(|e| ApiError::internal(format!("merged user: {e}")))?;
        self.store_user(merged.clone())?;
        Ok(merged)
    }

    /// Remove every persisted credential. Idempotent.
    pub fn clear_all(&self) -> Result<(), ApiError> {
        for key in keys::CREDENTIALS {
            self.remove(key)?;
        }
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    /// End the session involuntarily.
    ///
    /// Emits [`SessionEvent::Expired`] and sets the explanatory flag only
    /// when a session existed, so one session expires exactly once. Returns
    /// whether it did.
    pub fn expire(&self) -> bool {
        let _serial = self.expiry.lock().unwrap_or_else(|e| e.into_inner());
        match self.has_session() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(error = %e, "cannot read session while expiring it");
            }
        }
        if let Err(e) = self.clear_all() {
            warn!(error = %e, "failed to clear expired session");
        }
        if let Err(e) = self.write(keys::SESSION_EXPIRED, "1") {
            warn!(error = %e, "failed to record session expiry");
        }
        warn!("session expired");
        self.events.emit(SessionEvent::Expired);
        true
    }

    /// Read and clear the "your session expired" flag.
    pub fn take_expired_notice(&self) -> bool {
        match self.read(keys::SESSION_EXPIRED) {
            Ok(Some(_)) => {
                if let Err(e) = self.remove(keys::SESSION_EXPIRED) {
                    warn!(error = %e, "failed to clear session-expired flag");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "cannot read session-expired flag");
                false
            }
        }
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Whether an exchange is running right now, here or in another
    /// manager sharing the store. Flags older than the wait timeout are
    /// treated as abandoned.
    pub fn is_refresh_in_progress(&self) -> bool {
        let Ok(Some(raw)) = self.read(keys::REFRESH_IN_PROGRESS) else {
            return false;
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(started) => {
                let age = Utc::now().signed_duration_since(started.with_timezone(&Utc));
                age.to_std()
                    .map(|age| age < self.config.refresh_wait_timeout())
                    .unwrap_or(true)
            }
            Err(_) => false,
        }
    }

    pub async fn refresh_current_token(&self) -> bool {
        self.refresh().await == RefreshOutcome::Refreshed
    }

    /// Exchange the refresh token for a new access token, single-flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        let current = self.access_token().ok().flatten();
        self.refresh_replacing(current.as_deref()).await
    }

    /// [`refresh`](Self::refresh) on behalf of a request that was sent with
    /// `used`. No exchange runs if a valid replacement is already stored.
    pub async fn refresh_replacing(&self, used: Option<&str>) -> RefreshOutcome {
        let seen = self.generation.load(Ordering::Acquire);

        let _gate = match tokio::time::timeout(
            self.config.refresh_wait_timeout(),
            self.refresh_gate.lock(),
        )
        .await
        {
            Ok(gate) => gate,
            Err(_) => {
                warn!("timed out waiting for in-flight token refresh");
                return self.outcome_from_stored_token();
            }
        };

        if self.generation.load(Ordering::Acquire) != seen {
            let outcome = *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner());
            debug!(?outcome, "joined in-flight token refresh");
            return outcome;
        }

        if self.replaced_since(used) {
            debug!("access token already replaced, skipping exchange");
            return RefreshOutcome::Refreshed;
        }

        if self.is_refresh_in_progress() {
            return self.wait_for_foreign_refresh().await;
        }

        let outcome = self.exchange().await;
        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    fn replaced_since(&self, used: Option<&str>) -> bool {
        match self.access_token() {
            Ok(Some(stored)) => used != Some(stored.as_str()) && self.is_token_valid(Some(&stored)),
            _ => false,
        }
    }

    fn outcome_from_stored_token(&self) -> RefreshOutcome {
        if self.is_token_valid(None) {
            RefreshOutcome::Refreshed
        } else {
            RefreshOutcome::Unavailable
        }
    }

    /// Another manager on the same store holds the flag: poll until it
    /// clears or the wait times out.
    async fn wait_for_foreign_refresh(&self) -> RefreshOutcome {
        debug!("refresh in progress elsewhere, waiting");
        let deadline = tokio::time::Instant::now() + self.config.refresh_wait_timeout();
        while self.is_refresh_in_progress() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.config.refresh_poll_interval()).await;
        }
        self.outcome_from_stored_token()
    }

    async fn exchange(&self) -> RefreshOutcome {
        let refresh = match self.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return RefreshOutcome::NoRefreshToken,
            Err(e) => {
                warn!(error = %e, "cannot read refresh token");
                return RefreshOutcome::Unavailable;
            }
        };

        let _flag = match InProgressFlag::raise(self.store.as_ref()) {
            Ok(flag) => flag,
            Err(e) => {
                warn!(error = %e, "cannot set refresh-in-progress flag");
                return RefreshOutcome::Unavailable;
            }
        };

        let mut request = self
            .http
            .post(self.config.url("/auth/refresh/"))
            .json(&json!({ "refresh": refresh }));
        if let Ok(Some(session_id)) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %from_transport(e), "token refresh unavailable");
                return RefreshOutcome::Unavailable;
            }
        };

        let status = response.status().as_u16();
        match status {
            200..=299 => match response.json::<RefreshResponse>().await {
                Ok(body) => match self.store_refreshed(body) {
                    Ok(()) => {
                        info!("access token refreshed");
                        RefreshOutcome::Refreshed
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to persist refreshed token");
                        RefreshOutcome::Unavailable
                    }
                },
                Err(e) => {
                    warn!(error = %from_transport(e), "unreadable refresh response");
                    RefreshOutcome::Unavailable
                }
            },
            400 | 401 | 403 => {
                warn!(status, "refresh token rejected");
                self.expire();
                RefreshOutcome::Rejected
            }
            _ => {
                warn!(status, "token refresh unavailable");
                RefreshOutcome::Unavailable
            }
        }
    }

    fn store_refreshed(&self, body: RefreshResponse) -> Result<(), ApiError> {
        self.set_access_token(&body.access)?;
        if let Some(refresh) = body.refresh.as_deref().filter(|r| !r.is_empty()) {
            self.set_refresh_token(refresh)?;
        }
        Ok(())
    }
}

/// Holds `auth:refresh_in_progress` for the lifetime of one exchange and
/// clears it on every exit path.
struct InProgressFlag<'a> {
    store: &'a dyn KVStore,
}

impl<'a> InProgressFlag<'a> {
    fn raise(store: &'a dyn KVStore) -> Result<Self, ApiError> {
        store
            .set_string(keys::REFRESH_IN_PROGRESS, &Utc::now().to_rfc3339())
            .map_err(from_storage)?;
        Ok(Self { store })
    }
}

impl Drop for InProgressFlag<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.delete(keys::REFRESH_IN_PROGRESS) {
            warn!(error = %e, "failed to clear refresh-in-progress flag");
        }
    }
}
