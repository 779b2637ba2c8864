use crate::{
    auth::{extract_bearer_token, IdentityProvider},
    config::{Config, PhotoConfig},
    embedder::Embedder,
    errors::{CoreError, ErrorKind},
    images,
    photos::PhotoStore,
    report::{Appearance, ReportCreate, ReportId, ReportStatus, ReportView},
    service::{MatchService, Stats},
};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, path::PathBuf, sync::Arc};
use tokio::signal;

/// Results returned by a search when the request does not say otherwise
const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_LIST_LIMIT: usize = 10;

pub struct SharedState {
    pub service: Arc<MatchService>,
    pub embedder: Arc<dyn Embedder>,
    pub photos: Arc<dyn PhotoStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub photo_config: PhotoConfig,
    pub photo_dir: PathBuf,
}

/// Principal that authenticated the current request.
#[derive(Debug, Clone)]
struct Principal(String);

pub fn router(state: Arc<SharedState>, max_body_bytes: usize) -> Router {
    let api = Router::new()
        .route("/reports", get(list_reports).post(create_report))
        .route("/reports/search", post(search))
        .route("/reports/:report_id", get(get_report))
        .route("/reports/:report_id/status", put(update_status))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let photos = Router::new()
        .nest_service(
            "/photos",
            tower_http::services::ServeDir::new(&state.photo_dir),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .nest("/api", api)
        .merge(photos)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn start_app(config: Config, state: Arc<SharedState>) -> anyhow::Result<()> {
    let app = router(state, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    log::info!("listening on {}", config.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutdown requested, draining connections");
}

/// Serve HTTP until Ctrl+C or SIGTERM, then flush the service.
pub fn start_daemon(config: Config, state: Arc<SharedState>) -> anyhow::Result<()> {
    let service = state.service.clone();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(config, state))?;

    service.shutdown()?;
    Ok(())
}

#[derive(Debug)]
enum HttpError {
    Core(CoreError),
    Unauthorized(&'static str),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpError::Core(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
                ErrorKind::Dependency => StatusCode::BAD_GATEWAY,
                ErrorKind::Consistency | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        let message = match &self {
            HttpError::Unauthorized(message) => message.to_string(),
            HttpError::Core(err) => err.to_string(),
        };

        if status.is_server_error() {
            log::error!("{self:?}");
        } else {
            log::debug!("{self:?}");
        }

        (status, Json(json!({"error": message}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<CoreError>,
{
    fn from(err: E) -> Self {
        Self::Core(err.into())
    }
}

async fn require_token(
    State(state): State<Arc<SharedState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(HttpError::Unauthorized("missing bearer token"))?;

    let principal = state
        .identity
        .authenticate(token)
        .ok_or(HttpError::Unauthorized("invalid token"))?;

    request.extensions_mut().insert(Principal(principal));
    Ok(next.run(request).await)
}

fn decode_photo(photo_b64: &str) -> Result<Vec<u8>, CoreError> {
    STANDARD
        .decode(photo_b64.trim())
        .map_err(|err| CoreError::Validation(format!("photo is not valid base64: {err}")))
}

/// RFC 3339, or a naive ISO 8601 date-time taken as UTC.
fn parse_datetime(value: &str) -> Result<DateTime<Utc>, CoreError> {
    let value = value.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            CoreError::Validation(format!(
                "datetime_last_seen '{value}' is not an ISO 8601 date-time"
            ))
        })
}

#[derive(Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    pub age: u32,
    pub last_seen: String,
    pub datetime_last_seen: String,
    pub photo_b64: String,

    #[serde(default)]
    pub appearance: Option<Appearance>,
    #[serde(default)]
    pub details: Option<String>,
}

impl Debug for CreateReportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CreateReportRequest {{ name: {:?}, age: {}, last_seen: {:?}, datetime_last_seen: {:?}, photo_b64: [REDACTED], appearance: {:?}, details: {:?} }}", self.name, self.age, self.last_seen, self.datetime_last_seen, self.appearance, self.details)
    }
}

async fn create_report(
    State(state): State<Arc<SharedState>>,
    Extension(Principal(principal)): Extension<Principal>,
    Json(payload): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<ReportView>), HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let datetime_last_seen = parse_datetime(&payload.datetime_last_seen)?;
        let photo = images::normalize_photo(&decode_photo(&payload.photo_b64)?, &state.photo_config)?;
        if photo.was_resized {
            log::debug!(
                "Resized photo from {:?} to {:?}",
                photo.original_dimensions,
                photo.dimensions
            );
        }

        // all outside calls happen before anything is committed
        let embedding = state.embedder.embed(&photo.data)?;
        let photo_reference = state.photos.put(&photo.data)?;

        let fields = ReportCreate {
            name: payload.name,
            age: payload.age,
            last_seen: payload.last_seen,
            datetime_last_seen,
            photo_reference: photo_reference.clone(),
            appearance: payload.appearance,
            details: payload.details,
        };

        match state.service.create_report(fields, embedding, &principal) {
            Ok(report) => Ok((StatusCode::CREATED, Json(ReportView::from(&report)))),
            Err(err) => {
                if let Err(delete_err) = state.photos.delete(&photo_reference) {
                    log::error!("Failed to delete photo {photo_reference}: {delete_err}");
                }
                Err(err.into())
            }
        }
    })
}

#[derive(Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub photo_b64: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchRequest {{ photo_b64: {}, embedding: {}, threshold: {:?}, limit: {:?} }}",
            if self.photo_b64.is_some() { "[REDACTED]" } else { "None" },
            self.embedding
                .as_ref()
                .map(|e| format!("[{} values]", e.len()))
                .unwrap_or_else(|| "None".to_string()),
            self.threshold,
            self.limit
        )
    }
}

#[derive(Debug, Serialize)]
pub struct MatchView {
    pub rank: usize,
    pub similarity: f32,
    #[serde(flatten)]
    pub report: ReportView,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub matches: Vec<MatchView>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let query = match (payload.photo_b64, payload.embedding) {
            (Some(photo_b64), None) => {
                let photo = images::normalize_photo(&decode_photo(&photo_b64)?, &state.photo_config)?;
                state.embedder.embed(&photo.data)?
            }
            (None, Some(embedding)) => embedding,
            _ => {
                return Err(CoreError::Validation(
                    "provide exactly one of photo_b64 or embedding".to_string(),
                )
                .into())
            }
        };

        let matches = state.service.search(
            &query,
            payload.threshold,
            payload.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )?;

        Ok(Json(SearchResponse {
            matches: matches
                .iter()
                .map(|m| MatchView {
                    rank: m.rank,
                    similarity: m.similarity,
                    report: ReportView::from(&m.report),
                })
                .collect(),
        }))
    })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// `active` (default), `resolved`, `archived` or `all`
    #[serde(default, alias = "status_filter")]
    pub status: Option<String>,
    #[serde(default, alias = "skip")]
    pub offset: usize,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

async fn list_reports(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReportView>>, HttpError> {
    log::debug!("query: {query:?}");

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => Some(ReportStatus::Active),
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(s.parse::<ReportStatus>()?),
    };

    tokio::task::block_in_place(move || {
        Ok(Json(state.service.list_reports(status, query.offset, query.limit)?))
    })
}

async fn get_report(
    State(state): State<Arc<SharedState>>,
    Path(report_id): Path<String>,
) -> Result<Json<ReportView>, HttpError> {
    let report_id = ReportId::from(report_id);

    tokio::task::block_in_place(move || {
        let report = state.service.get_report(&report_id)?;
        Ok(Json(ReportView::from(&report)))
    })
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    #[serde(alias = "new_status")]
    pub status: String,
}

async fn update_status(
    State(state): State<Arc<SharedState>>,
    Extension(Principal(principal)): Extension<Principal>,
    Path(report_id): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<ReportView>, HttpError> {
    let report_id = ReportId::from(report_id);
    let status: ReportStatus = payload.status.parse()?;
    log::info!("{principal} requested {report_id} -> {status}");

    tokio::task::block_in_place(move || {
        let report = state.service.update_status(&report_id, status)?;
        Ok(Json(ReportView::from(&report)))
    })
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<Stats>, HttpError> {
    tokio::task::block_in_place(move || Ok(Json(state.service.stats()?)))
}
