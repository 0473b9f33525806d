use crate::config::Config;
use crate::credentials::Credentials;
use crate::directory::Directory;
use crate::error::{DirectoryError, ProviderError, ServiceError};
use crate::models::{Booking, Room};
use crate::provider::BookingProvider;
use crate::providers::timeedit::{Instance, TimeEditProvider};
use crate::providers::union_portal::UnionPortalProvider;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::NaiveDateTime;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const COOKIE_NAME: &str = "credentials";
const COOKIE_DAYS: i64 = 30;
/// Covers two portal logins plus the fan-out on a slow day.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

struct AppState {
    config: Config,
    key: [u8; 32],
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let key = config.secret_key()?;
    let addr = config.server_addr.clone();
    let state = Arc::new(AppState { config, key });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:8080"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/auth", axum::routing::post(login).delete(logout))
        .route("/api/auth/test", get(auth_test))
        .route(
            "/api/booking",
            get(list_bookings).post(book).delete(unbook),
        )
        .route("/api/booking/available", get(available))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Upstream(String),
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::InvalidBooking(msg) => ApiError::BadRequest(msg),
            DirectoryError::ProviderNotFound(name) => {
                ApiError::BadRequest(format!("unknown provider: {name}"))
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Auth(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Pulls the sealed credential cookie out of the request and opens it.
fn credentials_from_headers(
    headers: &HeaderMap,
    key: &[u8; 32],
) -> Result<Credentials, ApiError> {
    let Some(sealed) = cookie_value(headers, COOKIE_NAME) else {
        return Err(ApiError::Unauthorized("no credential cookie".into()));
    };
    let sealed = BASE64
        .decode(sealed)
        .map_err(|_| ApiError::Unauthorized("credential cookie is not valid base64".into()))?;
    Credentials::decrypt(key, &sealed)
        .map_err(|err| ApiError::Unauthorized(format!("credential cookie rejected: {err}")))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Ok(cookie) = Cookie::parse(pair.trim().to_owned()) {
                if cookie.name() == name {
                    return Some(cookie.value().to_string());
                }
            }
        }
    }
    None
}

fn session_cookie(sealed: &[u8]) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, BASE64.encode(sealed)))
        .path("/api")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::days(COOKIE_DAYS))
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, ""))
        .path("/api")
        .http_only(true)
        .max_age(cookie::time::Duration::ZERO)
        .build()
}

/// Adapters carry portal sessions that expire, so each request logs in fresh
/// with the cookie's credentials instead of pooling connections.
async fn directory_for(
    state: &AppState,
    credentials: &Credentials,
) -> Result<Directory, ApiError> {
    let instance = if state.config.use_test_instance {
        Instance::ChalmersTest
    } else {
        Instance::Chalmers
    };

    let mut providers: Vec<Box<dyn BookingProvider>> = Vec::new();
    let timeedit = TimeEditProvider::connect(
        instance,
        &credentials.username,
        &credentials.password,
        &state.config.user_agent,
        state.config.room_info_url.as_deref(),
    )
    .await?;
    providers.push(Box::new(timeedit));

    if state.config.union_portal {
        let union = UnionPortalProvider::connect(
            &credentials.username,
            &credentials.password,
            &state.config.user_agent,
        )
        .await?;
        providers.push(Box::new(union));
    }

    let directory = Directory::new(providers)
        .map_err(|err| ApiError::Upstream(err.to_string()))?
        .with_call_timeout(Duration::from_secs(state.config.call_timeout_seconds));
    Ok(directory)
}

async fn ping() -> &'static str {
    "pong"
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let sealed = credentials
        .encrypt(&state.key)
        .map_err(|err| ApiError::Upstream(err.to_string()))?;
    let headers = [(
        header::SET_COOKIE,
        session_cookie(&sealed).to_string(),
    )];
    Ok((StatusCode::NO_CONTENT, headers))
}

async fn logout() -> impl IntoResponse {
    let headers = [(header::SET_COOKIE, removal_cookie().to_string())];
    (StatusCode::NO_CONTENT, headers)
}

#[derive(Serialize)]
struct AuthTestResponse {
    has_cookie: bool,
}

async fn auth_test(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<AuthTestResponse> {
    let has_cookie = credentials_from_headers(&headers, &state.key).is_ok();
    Json(AuthTestResponse { has_cookie })
}

#[derive(Serialize)]
struct ProviderFailure {
    provider: String,
    error: String,
}

impl From<ServiceError> for ProviderFailure {
    fn from(err: ServiceError) -> Self {
        Self {
            provider: err.provider.clone(),
            error: err.source.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct AvailableParams {
    from: String,
    to: String,
}

#[derive(Serialize)]
struct AvailableResponse {
    rooms: Vec<Room>,
    errors: Vec<ProviderFailure>,
}

async fn available(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AvailableParams>,
) -> Result<Json<AvailableResponse>, ApiError> {
    let credentials = credentials_from_headers(&headers, &state.key)?;
    let from = parse_datetime(&params.from)?;
    let to = parse_datetime(&params.to)?;

    let directory = directory_for(&state, &credentials).await?;
    let (rooms, errors) = directory.available(from, to).await?;
    Ok(Json(AvailableResponse {
        rooms,
        errors: errors.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Deserialize)]
struct BookRequest {
    room: Room,
    start: NaiveDateTime,
    end: NaiveDateTime,
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct BookResponse {
    id: String,
}

async fn book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<BookRequest>,
) -> Result<Json<BookResponse>, ApiError> {
    let credentials = credentials_from_headers(&headers, &state.key)?;
    let booking = Booking {
        room: request.room,
        start: request.start,
        end: request.end,
        text: request.text,
        id: String::new(),
    };

    let directory = directory_for(&state, &credentials).await?;
    let id = directory.book(&booking).await?;
    Ok(Json(BookResponse { id }))
}

#[derive(Serialize)]
struct BookingsResponse {
    bookings: Vec<Booking>,
    errors: Vec<ProviderFailure>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BookingsResponse>, ApiError> {
    let credentials = credentials_from_headers(&headers, &state.key)?;
    let directory = directory_for(&state, &credentials).await?;
    let (bookings, errors) = directory.my_bookings().await?;
    Ok(Json(BookingsResponse {
        bookings,
        errors: errors.into_iter().map(Into::into).collect(),
    }))
}

/// Cancellation ids may contain slashes, so they travel as query parameters
/// rather than path segments.
#[derive(Deserialize)]
struct UnbookParams {
    provider: String,
    id: String,
}

async fn unbook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UnbookParams>,
) -> Result<StatusCode, ApiError> {
    let credentials = credentials_from_headers(&headers, &state.key)?;
    let booking = Booking {
        room: Room::new(&params.provider, ""),
        start: NaiveDateTime::default(),
        end: NaiveDateTime::default(),
        text: String::new(),
        id: params.id,
    };

    let directory = directory_for(&state, &credentials).await?;
    directory.unbook(&booking).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_datetime(input: &str) -> Result<NaiveDateTime, ApiError> {
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
        .map_err(|_| ApiError::BadRequest(format!("bad datetime: {input}")))
}
