use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::dataset::{DatasetId, DatasetRecord, Owner, Summary};
use crate::error::{Error, Result};
use crate::graph::{ChartKind, render_chart};
use crate::loader::TableFormat;
use crate::login::{
    Auth, SessionStore, UserRegistry, handle_login, handle_logout, handle_register, require_auth,
    unauthorized,
};
use crate::projection::{ChartProjection, report_filename};
use crate::report::build_report;
use crate::storage::FsBlobStorage;
use crate::store::DatasetStore;
use crate::upload::UploadService;

pub struct AppState {
    uploads: Arc<UploadService>,
    auth: Auth,
    max_upload_bytes: usize,
}

impl FromRef<Arc<AppState>> for Auth {
    fn from_ref(state: &Arc<AppState>) -> Auth {
        state.auth.clone()
    }
}

impl AppState {
    pub fn new(uploads: Arc<UploadService>, auth: Auth, max_upload_bytes: usize) -> Arc<Self> {
        Arc::new(AppState {
            uploads,
            auth,
            max_upload_bytes,
        })
    }

    /// Open every persistent component under the configured data directory
    pub fn open(config: &ServerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let users = Arc::new(UserRegistry::open(config.users_path())?);
        users.ensure_admin(&config.admin)?;

        let blobs = Arc::new(FsBlobStorage::new(config.media_dir())?);
        let store = Arc::new(DatasetStore::open(config.snapshot_path(), blobs)?);

        Ok(Self::new(
            Arc::new(UploadService::new(store)),
            Auth {
                users,
                sessions: Arc::new(SessionStore::new()),
            },
            config.max_upload_bytes,
        ))
    }

    pub fn uploads(&self) -> &UploadService {
        &self.uploads
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }
}

/// A stored dataset as the clients see it
#[derive(Serialize)]
pub struct DatasetView {
    pub id: DatasetId,
    pub username: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub summary_data: Summary,
    pub file_path: String,
}

impl From<DatasetRecord> for DatasetView {
    fn from(record: DatasetRecord) -> Self {
        DatasetView {
            file_path: format!("/api/datasets/{}/file/", record.id),
            id: record.id,
            username: record.owner.to_string(),
            name: record.name,
            timestamp: record.created_at,
            summary_data: record.summary,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Validation { missing } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "Missing required columns in the dataset.",
                    "missing": missing,
                }),
            ),
            Error::UnsupportedFormat(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "Unsupported file format. Please upload a CSV or Excel file."
                }),
            ),
            Error::CorruptInput(_) | Error::EmptyInput => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "The uploaded file is empty or corrupted.",
                    "detail": self.to_string(),
                }),
            ),
            Error::NotFound => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "Not found." }),
            ),
            Error::Auth(message) => return unauthorized(message),
            Error::StorageIo { .. } | Error::Render(_) | Error::Config(_) => {
                log::error!("request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({
                        "error": format!("An unexpected error occurred during processing: {}", self)
                    }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Run CPU-bound work off the async executor
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::storage("background task", io::Error::other(e)))?
}

/// `attachment; filename="..."` with anything unsafe for a header replaced
fn attachment(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/history/", get(history))
        .route("/api/upload/", post(upload))
        .route("/api/summary/:id/", get(summary))
        .route("/api/chart/:id/", get(chart_data))
        .route("/api/chart/:id/:kind", get(chart_image))
        .route("/api/report/:id/", get(report))
        .route("/api/datasets/:id/file/", get(raw_file))
        .route("/api/datasets/:id/", delete(delete_dataset))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<Arc<AppState>>,
        ));

    let auth = Router::new()
        .route("/api-auth/login/", post(handle_login))
        .route("/api-auth/logout/", post(handle_logout))
        .route("/api-auth/register/", post(handle_register));

    Router::new()
        .merge(api)
        .merge(auth)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: ServerConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let state = AppState::open(&config)?;
    let app = router(state);

    let listener = TcpListener::bind(config.bind).await?;
    log::info!(
        "listening on http://{} (data in {})",
        config.bind,
        config.data_dir.display()
    );
    axum::serve(listener, app).await?;

    Ok(())
}

async fn history(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
) -> Json<Vec<DatasetView>> {
    let records = state.uploads.store().list(&owner);
    Json(records.into_iter().map(DatasetView::from).collect())
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut file: Option<(String, Bytes)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Ok(bad_request(&format!("Malformed upload: {}", e))),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        match field.bytes().await {
            Ok(bytes) => file = Some((filename, bytes)),
            Err(e) => return Ok(bad_request(&format!("Malformed upload: {}", e))),
        }
    }

    let Some((filename, bytes)) = file else {
        return Ok(bad_request("No file provided."));
    };

    let uploads = state.uploads.clone();
    let record =
        blocking(move || uploads.handle_upload(&owner, &filename, &bytes)).await?;

    Ok((StatusCode::CREATED, Json(DatasetView::from(record))).into_response())
}

async fn summary(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<u64>,
) -> Result<Json<Summary>> {
    let record = state.uploads.store().get(&owner, DatasetId(id))?;
    Ok(Json(record.summary))
}

async fn chart_data(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<u64>,
) -> Result<Json<ChartProjection>> {
    let record = state.uploads.store().get(&owner, DatasetId(id))?;
    Ok(Json(ChartProjection::from_summary(&record.summary)))
}

async fn chart_image(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path((id, kind)): Path<(u64, String)>,
) -> Result<Response> {
    let kind = ChartKind::from_file_name(&kind).ok_or(Error::NotFound)?;
    let record = state.uploads.store().get(&owner, DatasetId(id))?;

    let png = blocking(move || {
        render_chart(kind, &ChartProjection::from_summary(&record.summary))?.to_png()
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static("image/png"))], png).into_response())
}

async fn report(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<u64>,
) -> Result<Response> {
    let record = state.uploads.store().get(&owner, DatasetId(id))?;
    let filename = report_filename(&record);
    let pdf = blocking(move || build_report(&record)).await?;
    log::info!("rendered report {} for {}", filename, owner);

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        pdf,
    )
        .into_response())
}

async fn raw_file(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<u64>,
) -> Result<Response> {
    let uploads = state.uploads.clone();
    let (record, bytes) = blocking(move || uploads.read_raw(&owner, DatasetId(id))).await?;

    let content_type = match TableFormat::from_filename(&record.name) {
        Ok(TableFormat::Xlsx) => {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        }
        Ok(TableFormat::Csv) => "text/csv",
        Err(_) => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, attachment(&record.name)),
        ],
        bytes,
    )
        .into_response())
}

async fn delete_dataset(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    // Persists the snapshot and removes the raw file
    let uploads = state.uploads.clone();
    blocking(move || uploads.store().delete(&owner, DatasetId(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}
