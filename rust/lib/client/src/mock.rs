//! In-process REST backend for client tests.
//!
//! Issues HS256 tokens, counts calls per endpoint and can be told to fail.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const JWT_SECRET: &str = "mock-backend-secret";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub fn sign(ttl_secs: i64) -> String {
    let claims = Claims {
        sub: "1".into(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn user_json() -> Value {
    json!({
        "id": 1,
        "name": "Alice",
        "login": "alice",
        "email": "alice@acme.pe",
        "company": 7,
        "type": "admin",
        "last_login": "2024-05-01T10:00:00Z"
    })
}

fn customer_json(id: u64) -> Value {
    json!({"id": id, "name": format!("Cliente {id}"), "ruc": "20123456789", "state": 1})
}

#[derive(Default)]
pub struct MockState {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    /// Non-zero: `/auth/refresh/` answers with this status.
    pub refresh_failure: AtomicU16,
    /// Resource calls that answer 503 before behaving normally.
    pub flaky_remaining: AtomicUsize,
    /// Resource calls always answer 401, even with a valid token.
    pub always_unauthorized: AtomicBool,
    pub last_headers: Mutex<Option<HeaderMap>>,
    pub last_query: Mutex<Vec<(String, String)>>,
    pub last_upload: Mutex<Option<(String, usize)>>,
}

pub struct MockBackend {
    pub state: Arc<MockState>,
    addr: std::net::SocketAddr,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let api = Router::new()
            .route("/auth/login/", post(login))
            .route("/auth/refresh/", post(refresh))
            .route("/auth/validate/", post(validate))
            .route("/auth/logout/", post(logout))
            .route("/customers/", get(list_customers).post(create_customer))
            .route("/customers/import/", post(import_customers))
            .route("/customers/export/", get(export_customers))
            .route(
                "/customers/:id/",
                get(get_customer).put(update_customer).delete(delete_customer),
            )
            .with_state(state.clone());
        let app = Router::new().nest("/api", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn access_token(&self, ttl_secs: i64) -> String {
        sign(ttl_secs)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> usize {
        self.state.resource_calls.load(Ordering::SeqCst)
    }

    pub fn fail_refresh_with(&self, status: u16) {
        self.state.refresh_failure.store(status, Ordering::SeqCst);
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn last_query(&self) -> Vec<(String, String)> {
        self.state.last_query.lock().unwrap().clone()
    }
}

fn bearer_is_valid(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| {
            decode::<Claims>(
                token,
                &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
                &Validation::default(),
            )
            .is_ok()
        })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Authentication credentials were not provided."})),
    )
        .into_response()
}

/// Shared gate for resource endpoints: counts, records headers, applies
/// the configured failures and checks the bearer token.
fn admit(state: &MockState, headers: &HeaderMap) -> Option<Response> {
    state.resource_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_headers.lock().unwrap() = Some(headers.clone());

    if state
        .flaky_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Some((StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response());
    }
    if state.always_unauthorized.load(Ordering::SeqCst) || !bearer_is_valid(headers) {
        return Some(unauthorized());
    }
    None
}

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<LoginRequest>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    if body.login == "alice" && body.password == "secret123" {
        Json(json!({
            "access": sign(3600),
            "refresh": "r1",
            "user": user_json(),
            "session_id": "s1",
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid credentials"})),
        )
            .into_response()
    }
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // Long enough for concurrent callers to pile up behind the exchange.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let failure = state.refresh_failure.load(Ordering::SeqCst);
    if failure != 0 {
        let status = StatusCode::from_u16(failure).unwrap();
        return (status, "refresh failed").into_response();
    }
    match body.get("refresh").and_then(Value::as_str) {
        Some("r1") | Some("r2") => {
            Json(json!({"access": sign(3600), "refresh": "r2"})).into_response()
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        )
            .into_response(),
    }
}

async fn validate(headers: HeaderMap) -> StatusCode {
    if bearer_is_valid(&headers) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn logout(State(state): State<Arc<MockState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn list_customers(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    *state.last_query.lock().unwrap() = query;
    Json(json!({
        "count": 25,
        "next": null,
        "previous": null,
        "results": [customer_json(1), customer_json(2)],
    }))
    .into_response()
}

async fn get_customer(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."}))).into_response();
    }
    Json(customer_json(id)).into_response()
}

async fn create_customer(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    if body.get("name").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"name": ["This field is required."]})),
        )
            .into_response();
    }
    body["id"] = json!(99);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn update_customer(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    let mut current = customer_json(id);
    if let (Some(target), Some(patch)) = (current.as_object_mut(), body.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
    Json(current).into_response()
}

async fn delete_customer(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(_id): Path<u64>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn import_customers(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap();
            *state.last_upload.lock().unwrap() = Some((name, bytes.len()));
        }
    }
    Json(json!({
        "total_processed": 10,
        "success_count": 7,
        "error_count": 3,
        "errors": [
            {"row": 2, "message": "RUC inválido", "data": {"ruc": "123"}},
            {"row": 5, "message": "Nombre requerido", "data": {"name": ""}},
            {"row": 9, "message": "Duplicado", "data": {"ruc": "20123456789"}}
        ]
    }))
    .into_response()
}

async fn export_customers(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    let xlsx = query.iter().any(|(k, v)| k == "format" && v == "xlsx");
    if xlsx {
        (
            [
                (
                    "content-type",
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ),
                (
                    "content-disposition",
                    "attachment; filename=\"clientes.xlsx\"; filename*=UTF-8''clientes%202024.xlsx",
                ),
            ],
            vec![0x50u8, 0x4b, 0x03, 0x04],
        )
            .into_response()
    } else {
        ([("content-type", "text/csv")], "id,name\n1,Cliente 1\n").into_response()
    }
}
