//! Authenticated request pipeline.
//!
//! Every outbound call goes through [`Pipeline::send`]:
//!
//! 1. Request phase: a stale access token is refreshed before dispatch.
//! 2. Response phase: a 401 on a non-auth endpoint triggers one
//!    refresh-and-redispatch. A second 401, or a 401 on `/auth/...`, ends
//!    the session when the request carried the session's token.
//! 3. Transient failures (configured statuses, connect errors, timeouts)
//!    are retried with backoff, on a counter independent of the auth retry.

use std::sync::{Arc, RwLock};

use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
pub use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sipreciconts_core::{ApiError, FileUpload, Progress};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::from_transport;
use crate::session::{RefreshOutcome, SessionManager};

pub const SESSION_HEADER: &str = "X-Session-ID";
pub const COMPANY_HEADER: &str = "X-Company-ID";

const JSON: &str = "application/json";
const UPLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    /// Sent as `multipart/form-data` with a single `file` field.
    File(FileUpload),
}

/// Which credentials an envelope carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// The session's access token, refreshed as needed.
    Session,
    /// No `Authorization` header (login).
    Anonymous,
    /// A token captured by the caller, used as-is.
    Bearer(String),
}

/// One outbound call and its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub method: Method,
    /// API path, e.g. `/customers/12/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Payload,
    pub accept: String,
    pub credentials: Credentials,
    auth_retried: bool,
    attempt: u32,
}

impl Envelope {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Payload::Empty,
            accept: JSON.to_string(),
            credentials: Credentials::Session,
            auth_retried: false,
            attempt: 1,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Payload::Json(body);
        self
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.body = Payload::File(file);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.credentials = Credentials::Anonymous;
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Bearer(token.into());
        self
    }

    /// Paths under `/auth/` never trigger refresh-and-retry.
    pub fn is_auth_endpoint(&self) -> bool {
        let path = self.path.trim_start_matches('/');
        path == "auth" || path.starts_with("auth/")
    }

    pub fn auth_retried(&self) -> bool {
        self.auth_retried
    }

    /// 1-based dispatch number within the current transient-retry series.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Flip the auth-retry flag. Returns false if it was already set.
    fn mark_auth_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.auth_retried, true)
    }
}

/// A binary response body with the headers that describe it.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

pub struct Pipeline {
    session: Arc<SessionManager>,
    company_override: RwLock<Option<String>>,
}

impl Pipeline {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            company_override: RwLock::new(None),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    /// Send `X-Company-ID` for this company instead of the user's own.
    pub fn set_company_override(&self, company_id: Option<String>) {
        *self.company_override.write().unwrap_or_else(|e| e.into_inner()) = company_id;
    }

    /// The company id sent with every request, if any.
    pub fn company_id(&self) -> Option<String> {
        self.company_override
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .or_else(|| self.session.company_id())
    }

    // ── Public helpers ──────────────────────────────────────────────

    /// Dispatch and return the successful response.
    pub async fn send(&self, envelope: Envelope) -> Result<reqwest::Response, ApiError> {
        self.execute(envelope, None).await
    }

    /// Dispatch and decode a JSON body.
    pub async fn json<T: DeserializeOwned>(&self, envelope: Envelope) -> Result<T, ApiError> {
        let response = self.send(envelope).await?;
        response.json::<T>().await.map_err(from_transport)
    }

    /// Dispatch and discard the body.
    pub async fn no_content(&self, envelope: Envelope) -> Result<(), ApiError> {
        self.send(envelope).await.map(drop)
    }

    /// Dispatch and collect a binary body.
    pub async fn download(&self, envelope: Envelope) -> Result<Download, ApiError> {
        let response = self.send(envelope).await?;
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);
        let bytes = response.bytes().await.map_err(from_transport)?.to_vec();
        Ok(Download {
            bytes,
            content_type,
            content_disposition,
        })
    }

    /// Upload a [`Payload::File`] envelope, advancing `progress` as the
    /// body is streamed, and decode the JSON reply.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        envelope: Envelope,
        progress: &Progress,
    ) -> Result<T, ApiError> {
        let response = self.execute(envelope, Some(progress)).await?;
        let body = response.json::<T>().await.map_err(from_transport)?;
        progress.complete();
        Ok(body)
    }

    // ── Core loop ───────────────────────────────────────────────────

    async fn execute(
        &self,
        mut envelope: Envelope,
        progress: Option<&Progress>,
    ) -> Result<reqwest::Response, ApiError> {
        let (mut token, mut rejected) = self.authorize(&envelope).await?;

        loop {
            debug!(
                method = %envelope.method,
                path = %envelope.path,
                attempt = envelope.attempt,
                "dispatch"
            );
            let response = match self.dispatch(&envelope, token.as_deref(), progress).await {
                Ok(response) => response,
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout();
                    if retryable && self.config().retry.allows_another(envelope.attempt) {
                        self.back_off(&mut envelope, "network error").await;
                        continue;
                    }
                    return Err(from_transport(e));
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                return Ok(response);
            }

            if status == 401 {
                let body = response.text().await.unwrap_or_default();
                if envelope.is_auth_endpoint() || !envelope.mark_auth_retried() {
                    // Anonymous and bearer calls leave the stored session alone.
                    if envelope.credentials == Credentials::Session {
                        self.session.expire();
                    }
                    return Err(ApiError::from_status(401, &body));
                }
                if envelope.credentials != Credentials::Session {
                    return Err(ApiError::from_status(401, &body));
                }
                debug!(path = %envelope.path, "unauthorized, refreshing and retrying once");
                match self.session.refresh_replacing(token.as_deref()).await {
                    RefreshOutcome::Refreshed => {
                        token = self.session.access_token()?;
                        continue;
                    }
                    RefreshOutcome::Rejected => rejected = true,
                    RefreshOutcome::Unavailable | RefreshOutcome::NoRefreshToken => {}
                }
                self.session.expire();
                return Err(if rejected {
                    ApiError::TokenExpired("refresh token is invalid or expired".into())
                } else {
                    ApiError::from_status(401, &body)
                });
            }

            if self.config().retry.retries_status(status)
                && self.config().retry.allows_another(envelope.attempt)
            {
                self.back_off(&mut envelope, "transient status").await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!(method = %envelope.method, path = %envelope.path, status, "request failed");
            return Err(ApiError::from_status(status, &body));
        }
    }

    /// Request phase. Returns the token to attach and whether a refresh
    /// was rejected on the way.
    async fn authorize(&self, envelope: &Envelope) -> Result<(Option<String>, bool), ApiError> {
        let token = match &envelope.credentials {
            Credentials::Anonymous => return Ok((None, false)),
            Credentials::Bearer(token) => return Ok((Some(token.clone()), false)),
            Credentials::Session => self.session.access_token()?,
        };
        let Some(token) = token else {
            return Ok((None, false));
        };
        if self.session.is_token_valid(Some(&token)) {
            return Ok((Some(token), false));
        }

        debug!("access token stale, refreshing before dispatch");
        match self.session.refresh_replacing(Some(&token)).await {
            RefreshOutcome::Refreshed => Ok((self.session.access_token()?, false)),
            // Proceed without a token; the response phase resolves the 401.
            RefreshOutcome::Rejected => Ok((None, true)),
            RefreshOutcome::Unavailable | RefreshOutcome::NoRefreshToken => Ok((None, false)),
        }
    }

    async fn back_off(&self, envelope: &mut Envelope, reason: &str) {
        let delay = self.config().retry.delay_for(envelope.attempt);
        warn!(
            path = %envelope.path,
            attempt = envelope.attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "retrying"
        );
        tokio::time::sleep(delay).await;
        envelope.attempt += 1;
    }

    async fn dispatch(
        &self,
        envelope: &Envelope,
        token: Option<&str>,
        progress: Option<&Progress>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .session
            .http()
            .request(envelope.method.clone(), self.config().url(&envelope.path))
            .header(ACCEPT, envelope.accept.as_str());

        if !envelope.query.is_empty() {
            request = request.query(&envelope.query);
        }

        request = match &envelope.body {
            Payload::Empty => request.header(CONTENT_TYPE, JSON),
            Payload::Json(body) => request.json(body),
            // reqwest sets the multipart Content-Type with its boundary.
            Payload::File(file) => request.multipart(upload_form(file, progress)?),
        };

        if let Some(company_id) = self.company_id() {
            request = request.header(COMPANY_HEADER, company_id);
        }
        if let Ok(Some(session_id)) = self.session.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        request.send().await
    }
}

/// Multipart form with the file streamed in chunks. Progress tops out at
/// 99 here and reaches 100 once the server has answered.
fn upload_form(
    file: &FileUpload,
    progress: Option<&Progress>,
) -> Result<reqwest::multipart::Form, reqwest::Error> {
    let total = file.bytes.len().max(1);
    let chunks: Vec<Vec<u8>> = file.bytes.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
    let progress = progress.cloned();
    let mut sent = 0usize;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        if let Some(progress) = &progress {
            let percent = (sent * 99 / total).min(99);
            progress.advance_to(percent as u8);
        }
        Ok::<_, std::io::Error>(chunk)
    }));

    let part = reqwest::multipart::Part::stream_with_length(
        reqwest::Body::wrap_stream(stream),
        file.bytes.len() as u64,
    )
    .file_name(file.file_name.clone())
    .mime_str(&file.content_type)?;

    Ok(reqwest::multipart::Form::new().part("file", part))
}
