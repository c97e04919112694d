use std::sync::Arc;

use serde_json::json;
use sipreciconts_core::{ApiError, User};
use tracing::{info, warn};

use crate::events::SessionEvent;
use crate::pipeline::{Envelope, Pipeline};
use crate::session::LoginResponse;

/// The `/auth/` endpoints.
pub struct AuthClient {
    pipeline: Arc<Pipeline>,
}

impl AuthClient {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Exchange credentials for a session.
    pub async fn login(&self, login: &str, password: &str) -> Result<User, ApiError> {
        let envelope = Envelope::post("/auth/login/")
            .anonymous()
            .with_json(json!({ "login": login, "password": password }));
        let response: LoginResponse = self.pipeline.json(envelope).await?;
        let user = response.user.clone();
        self.pipeline.session().establish(response)?;
        info!(login = %user.login, "signed in");
        Ok(user)
    }

    /// Sign out. The server-side call is best-effort; local credentials
    /// are always cleared. Safe to call without a session.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let session = self.pipeline.session();
        if !session.has_session()? {
            return session.clear_all();
        }

        let access = session.access_token()?;
        let refresh = session.refresh_token()?;
        session.clear_all()?;
        session.events().emit(SessionEvent::SignedOut);
        info!("signed out");

        let mut envelope = Envelope::post("/auth/logout/").with_json(json!({ "refresh": refresh }));
        envelope = match access {
            Some(token) => envelope.with_bearer(token),
            None => envelope.anonymous(),
        };
        if let Err(e) = self.pipeline.no_content(envelope).await {
            warn!(error = %e, "server-side logout failed");
        }
        Ok(())
    }

    /// Ask the server whether the current access token is still accepted.
    ///
    /// An auth rejection answers `false`. Transport and server faults are
    /// errors, since they say nothing about the token.
    pub async fn validate(&self) -> Result<bool, ApiError> {
        if self.pipeline.session().access_token()?.is_none() {
            return Ok(false);
        }
        match self.pipeline.no_content(Envelope::post("/auth/validate/")).await {
            Ok(()) => Ok(true),
            Err(e @ (ApiError::Network(_) | ApiError::Server { .. })) => Err(e),
            Err(_) => Ok(false),
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.pipeline.session().user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock::MockBackend;
    use crate::session::SessionManager;
    use serde_json::Value;
    use sipreciconts_core::ErrorCode;
    use sipreciconts_kv::{KVStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn client(base_url: &str) -> (AuthClient, Arc<Pipeline>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn KVStore> = store.clone();
        let session = SessionManager::new(dyn_store, ClientConfig::new(base_url)).unwrap();
        let pipeline = Arc::new(Pipeline::new(Arc::new(session)));
        (AuthClient::new(pipeline.clone()), pipeline, store)
    }

    #[tokio::test]
    async fn login_populates_session_and_authenticates_calls() {
        let backend = MockBackend::start().await;
        let (auth, pipeline, _) = client(&backend.base_url());

        let user = auth.login("alice", "secret123").await.unwrap();
        assert_eq!(user.login, "alice");
        assert_eq!(auth.current_user().map(|u| u.login), Some("alice".into()));

        let session = pipeline.session();
        let access = session.access_token().unwrap().unwrap();
        assert_eq!(session.refresh_token().unwrap().as_deref(), Some("r1"));
        assert_eq!(session.session_id().unwrap().as_deref(), Some("s1"));

        let _: Value = pipeline.json(Envelope::get("/customers/")).await.unwrap();
        assert_eq!(backend.last_header("authorization"), Some(format!("Bearer {access}")));
        assert_eq!(backend.last_header("x-company-id").as_deref(), Some("7"));
        assert!(auth.validate().await.unwrap());
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let backend = MockBackend::start().await;
        let (auth, pipeline, store) = client(&backend.base_url());

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert!(!pipeline.session().has_session().unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn failed_relogin_keeps_the_existing_session() {
        let backend = MockBackend::start().await;
        let (auth, pipeline, _) = client(&backend.base_url());
        auth.login("alice", "secret123").await.unwrap();
        let access = pipeline.session().access_token().unwrap();

        let expired = Arc::new(AtomicUsize::new(0));
        let e = expired.clone();
        pipeline.session().events().subscribe(move |ev| {
            if ev == SessionEvent::Expired {
                e.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        assert!(pipeline.session().has_session().unwrap());
        assert_eq!(pipeline.session().access_token().unwrap(), access);
        assert!(!pipeline.session().take_expired_notice());
    }

    #[tokio::test]
    async fn logout_clears_and_is_idempotent() {
        let backend = MockBackend::start().await;
        let (auth, pipeline, store) = client(&backend.base_url());

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        pipeline.session().events().subscribe(move |ev| e.lock().unwrap().push(ev));

        // Without a session: no-op, no error, no server call.
        auth.logout().await.unwrap();
        auth.logout().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(backend.state.logout_calls.load(Ordering::SeqCst), 0);

        auth.login("alice", "secret123").await.unwrap();
        auth.logout().await.unwrap();
        assert!(store.is_empty());
        auth.logout().await.unwrap();
        assert!(store.is_empty());

        assert_eq!(backend.state.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEvent::SignedIn, SessionEvent::SignedOut]
        );
        assert!(!auth.validate().await.unwrap());
    }

    #[tokio::test]
    async fn logout_succeeds_when_server_is_gone() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (auth, pipeline, store) = client(&format!("http://{addr}/api"));
        pipeline.session().set_access_token("a").unwrap();
        pipeline.session().set_refresh_token("r").unwrap();

        let signed_out = Arc::new(AtomicUsize::new(0));
        let s = signed_out.clone();
        pipeline.session().events().subscribe(move |ev| {
            if ev == SessionEvent::SignedOut {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        auth.logout().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);
    }
}
