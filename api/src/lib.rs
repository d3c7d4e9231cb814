use anyhow::Context;
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod import;
pub mod loader;
pub mod models;

use crate::config::Config;
use crate::db::TopCategory;
use crate::error::HistoryError;

const MAX_USERNAME_LEN: usize = 15;

/// Upper bound for one multipart upload; a full export runs to tens of MB.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl StatusResponse {
    fn new(status: &str, message: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            task_id,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    db: SqlitePool,
    tasks: Arc<RwLock<HashMap<String, StatusResponse>>>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<HistoryError>() {
            Some(HistoryError::DirectoryNotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            None => {
                tracing::error!("request failed: {:#}", err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("An unexpected error occurred: {}", err),
                )
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = StatusResponse::new("error", self.message, None);
        (self.status, Json(body)).into_response()
    }
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if len == 0 || len > MAX_USERNAME_LEN {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!(
                "username must be between 1 and {} characters",
                MAX_USERNAME_LEN
            ),
        ));
    }
    Ok(())
}

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse::new(
        "ok",
        "Streaming history API is running",
        None,
    ))
}

async fn health_check(State(state): State<AppState>) -> Response {
    match db::ping(&state.db).await {
        Ok(()) => Json(serde_json::json!({ "status": "healthy", "database": "connected" }))
            .into_response(),
        Err(e) => {
            tracing::warn!("health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn process_files(
    State(state): State<AppState>,
    Path((username, dir_path)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = import::import_directory(&state.db, &username, &dir_path).await?;

    Ok(Json(StatusResponse::new(
        "success",
        format!(
            "Processed and saved {} records for user {}.",
            report.kept_records, username
        ),
        None,
    )))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    username: String,
    dir_path: String,
}

/// Register a task and run the import in the background. A staging directory,
/// if given, is removed once the import finishes either way.
async fn spawn_import(
    state: &AppState,
    username: String,
    dir: PathBuf,
    staging: Option<TempDir>,
) -> String {
    let task_id = format!("import_{}_{}", Utc::now().timestamp(), username);
    state.tasks.write().await.insert(
        task_id.clone(),
        StatusResponse::new("processing", "Processing files...", Some(task_id.clone())),
    );

    let db = state.db.clone();
    let tasks = state.tasks.clone();
    let id = task_id.clone();
    tokio::spawn(async move {
        let status = match import::import_directory(&db, &username, &dir).await {
            Ok(report) => {
                tracing::info!("[{}] imported {} records", id, report.stored_records);
                StatusResponse::new(
                    "completed",
                    format!(
                        "Successfully imported {} records for user '{}'",
                        report.kept_records, username
                    ),
                    Some(id.clone()),
                )
            }
            Err(e) => {
                tracing::error!("[{}] import failed: {:#}", id, e);
                StatusResponse::new("failed", format!("Error: {}", e), Some(id.clone()))
            }
        };

        if let Some(staging) = staging {
            if let Err(e) = staging.close() {
                tracing::warn!("[{}] failed to remove staging directory: {}", id, e);
            }
        }
        tasks.write().await.insert(id, status);
    });

    task_id
}

async fn start_import(
    State(state): State<AppState>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let Json(request) = payload?;
    validate_username(&request.username)?;

    let task_id = spawn_import(&state, request.username, request.dir_path.into(), None).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(StatusResponse::new(
            "accepted",
            "Import accepted. Processing has started.",
            Some(task_id),
        )),
    ))
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    username: String,
}

/// Name to stage an upload under: the bare file name with a lowercase
/// `.json` extension, or `None` if the upload is not a JSON file.
fn staged_file_name(upload_name: &str) -> Option<String> {
    let name = std::path::Path::new(upload_name).file_name()?;
    let name = std::path::Path::new(name);
    let ext = name.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("json") {
        return None;
    }
    Some(format!("{}.json", name.file_stem()?.to_str()?))
}

async fn upload_import(
    State(state): State<AppState>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let Query(UploadQuery { username }) = query?;
    validate_username(&username)?;
    let mut multipart = multipart?;

    let staging = TempDir::new().context("failed to create staging directory")?;
    let mut staged = 0;
    while let Some(field) = multipart.next_field().await? {
        let Some(upload_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let file_name = staged_file_name(&upload_name).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("File {} is not a JSON file", upload_name),
            )
        })?;

        let bytes = field.bytes().await?;
        let path = staging.path().join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to stage {}", upload_name))?;
        tracing::debug!("staged {} ({} bytes)", path.display(), bytes.len());
        staged += 1;
    }

    if staged == 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No files provided"));
    }

    let dir = staging.path().to_path_buf();
    let task_id = spawn_import(&state, username, dir, Some(staging)).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(StatusResponse::new(
            "accepted",
            "Files uploaded successfully. Processing has started.",
            Some(task_id),
        )),
    ))
}

async fn import_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .tasks
        .read()
        .await
        .get(&task_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Task not found"))
}

#[derive(Debug, Deserialize)]
struct TopRequest {
    username: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    top_n: i64,
    category: String,
}

async fn get_top_items(
    State(state): State<AppState>,
    payload: Result<Json<TopRequest>, JsonRejection>,
) -> Result<Json<Vec<db::TopItem>>, ApiError> {
    let Json(request) = payload?;
    validate_username(&request.username)?;
    let top_n = u32::try_from(request.top_n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "top_n must be greater than 0"))?;
    let category: TopCategory = request
        .category
        .parse()
        .map_err(|e: anyhow::Error| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let start = request.start_date.unwrap_or_else(db::history_start);
    let end = request.end_date.unwrap_or_else(|| Utc::now().date_naive());

    let user = db::find_user(&state.db, &request.username)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "User not found"))?;

    let items = db::fetch_top_items(&state.db, user.id, start, end, top_n, category).await?;
    Ok(Json(items))
}

async fn get_summary(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<aggregate::HistorySummary>, ApiError> {
    if db::find_user(&state.db, &username).await?.is_none() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "User not found"));
    }

    let plays = db::fetch_history(&state.db, &username).await?;
    Ok(Json(aggregate::summarize(&plays, &username)))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/files/:username/*dir_path", get(process_files))
        .route("/import", post(start_import))
        .route(
            "/import/files",
            post(upload_import).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/import/status/:task_id", get(import_status))
        .route("/top", post(get_top_items))
        .route("/summary/:username", get(get_summary))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing("streaming_history_api=info,tower_http=info");

    let config = Config::from_env()?;
    let db = db::init_db(&config.database_url).await?;
    tracing::info!("database initialized at {}", config.database_url);

    let app = app(AppState::new(db));

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "history-upload-boundary";

    async fn test_app() -> (Router, SqlitePool, TempDir) {
        let tmp = TempDir::new().unwrap();
        let pool = db::init_db_file(tmp.path().join("api.db")).await.unwrap();
        (app(AppState::new(pool.clone())), pool, tmp)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_request(uri: &str, files: &[(&str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/json\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    /// Poll a task until it leaves `processing` and return its final body.
    async fn wait_for_task(app: &Router, task_id: &str) -> serde_json::Value {
        let mut body = serde_json::Value::Null;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/import/status/{}", task_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            body = body_json(response).await;
            if body["status"] != "processing" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        body
    }

    async fn accepted_task_id(response: Response) -> String {
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn export_json() -> serde_json::Value {
        serde_json::json!([
            {
                "ts": "2024-04-01T09:00:00Z",
                "ms_played": 200000,
                "master_metadata_track_name": "Teardrop",
                "master_metadata_album_artist_name": "Massive Attack",
                "master_metadata_album_album_name": "Mezzanine",
                "reason_end": "trackdone"
            },
            {
                "ts": "2024-04-01T09:05:00Z",
                "ms_played": 3000,
                "master_metadata_track_name": "Angel",
                "master_metadata_album_artist_name": "Massive Attack",
                "master_metadata_album_album_name": "Mezzanine",
                "reason_end": "fwdbtn"
            }
        ])
    }

    fn write_export(dir: &std::path::Path) {
        std::fs::write(
            dir.join("Streaming_History_Audio_2024.json"),
            export_json().to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn root_reports_ok() {
        let (app, _pool, _tmp) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn health_reports_connected_database() {
        let (app, _pool, _tmp) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["database"], "connected");
    }

    #[tokio::test]
    async fn missing_directory_is_404() {
        let (app, _pool, _tmp) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/files/alice/no/such/dir")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("Directory not found"));
    }

    #[tokio::test]
    async fn background_import_completes() {
        let (app, pool, tmp) = test_app().await;
        let export_dir = tmp.path().join("export");
        std::fs::create_dir(&export_dir).unwrap();
        write_export(&export_dir);

        let response = app
            .clone()
            .oneshot(json_request(
                "/import",
                serde_json::json!({
                    "username": "alice",
                    "dir_path": export_dir.to_string_lossy(),
                }),
            ))
            .await
            .unwrap();
        let task_id = accepted_task_id(response).await;
        assert!(task_id.starts_with("import_") && task_id.ends_with("_alice"));

        let status = wait_for_task(&app, &task_id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(db::fetch_history(&pool, "alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn background_import_of_missing_directory_fails() {
        let (app, pool, tmp) = test_app().await;
        let missing = tmp.path().join("never-exported");

        let response = app
            .clone()
            .oneshot(json_request(
                "/import",
                serde_json::json!({
                    "username": "alice",
                    "dir_path": missing.to_string_lossy(),
                }),
            ))
            .await
            .unwrap();
        let task_id = accepted_task_id(response).await;

        let status = wait_for_task(&app, &task_id).await;
        assert_eq!(status["status"], "failed");
        assert_eq!(status["task_id"], task_id.as_str());
        assert!(status["message"]
            .as_str()
            .unwrap()
            .contains("Directory not found"));
        assert!(db::find_user(&pool, "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unparsable_export_is_500() {
        let (app, _pool, _tmp) = test_app().await;
        // The wildcard segment is relative, so stage the export under the working directory.
        let exports = tempfile::Builder::new()
            .prefix("broken-export")
            .tempdir_in(".")
            .unwrap();
        std::fs::write(exports.path().join("broken.json"), "[{\"ts\": ").unwrap();
        let dir_name = exports.path().file_name().unwrap().to_string_lossy();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/files/alice/{}", dir_name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("An unexpected error occurred"));
    }

    #[tokio::test]
    async fn uploaded_files_are_imported() {
        let (app, pool, _tmp) = test_app().await;
        let export = export_json().to_string();

        let response = app
            .clone()
            .oneshot(upload_request(
                "/import/files?username=alice",
                &[
                    ("Streaming_History_Audio_2024_0.json", export.as_str()),
                    ("Streaming_History_Audio_2024_1.JSON", export.as_str()),
                ],
            ))
            .await
            .unwrap();
        let task_id = accepted_task_id(response).await;

        let status = wait_for_task(&app, &task_id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(db::fetch_history(&pool, "alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upload_rejects_bad_requests() {
        let (app, _pool, _tmp) = test_app().await;
        let export = export_json().to_string();

        let no_files = app
            .clone()
            .oneshot(upload_request("/import/files?username=alice", &[]))
            .await
            .unwrap();
        assert_eq!(no_files.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(no_files).await["status"], "error");

        let text_only = Request::builder()
            .method("POST")
            .uri("/import/files?username=alice")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
            )))
            .unwrap();
        let text_only = app.clone().oneshot(text_only).await.unwrap();
        assert_eq!(text_only.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(text_only).await["message"], "No files provided");

        let not_json = app
            .clone()
            .oneshot(upload_request(
                "/import/files?username=alice",
                &[
                    ("history.json", export.as_str()),
                    ("notes.txt", "hello"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(not_json).await["message"],
            "File notes.txt is not a JSON file"
        );

        let long_name = app
            .clone()
            .oneshot(upload_request(
                "/import/files?username=a-very-long-username",
                &[("history.json", export.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(long_name.status(), StatusCode::BAD_REQUEST);

        let no_username = app
            .oneshot(upload_request(
                "/import/files",
                &[("history.json", export.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(no_username.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(no_username).await["status"], "error");
    }

    #[test]
    fn staged_names_keep_only_json_file_names() {
        assert_eq!(staged_file_name("a.json").as_deref(), Some("a.json"));
        assert_eq!(staged_file_name("B.JSON").as_deref(), Some("B.json"));
        assert_eq!(
            staged_file_name("../../etc/passwd.json").as_deref(),
            Some("passwd.json")
        );
        assert_eq!(staged_file_name("notes.txt"), None);
        assert_eq!(staged_file_name(".json"), None);
        assert_eq!(staged_file_name(".."), None);
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let (app, _pool, _tmp) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/import/status/import_0_nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn import_rejects_long_username() {
        let (app, _pool, _tmp) = test_app().await;
        let response = app
            .oneshot(json_request(
                "/import",
                serde_json::json!({ "username": "a-very-long-username", "dir_path": "." }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn top_and_summary_read_stored_history() {
        let (app, pool, tmp) = test_app().await;
        write_export(tmp.path());
        import::import_directory(&pool, "alice", tmp.path())
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "/top",
                serde_json::json!({ "username": "alice", "top_n": 5, "category": "artists" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let top = body_json(response).await;
        assert_eq!(top[0]["name"], "Massive Attack");
        assert_eq!(top[0]["plays"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/summary/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary = body_json(response).await;
        assert_eq!(summary["total_plays"], 1);
        assert_eq!(
            summary["artists"]["Massive Attack"]["tracks"]["Teardrop"],
            1
        );
    }

    #[tokio::test]
    async fn top_validates_input() {
        let (app, pool, _tmp) = test_app().await;
        db::get_or_create_user(&pool, "alice").await.unwrap();

        let bad_category = app
            .clone()
            .oneshot(json_request(
                "/top",
                serde_json::json!({ "username": "alice", "top_n": 5, "category": "genres" }),
            ))
            .await
            .unwrap();
        assert_eq!(bad_category.status(), StatusCode::BAD_REQUEST);

        let bad_n = app
            .clone()
            .oneshot(json_request(
                "/top",
                serde_json::json!({ "username": "alice", "top_n": 0, "category": "tracks" }),
            ))
            .await
            .unwrap();
        assert_eq!(bad_n.status(), StatusCode::BAD_REQUEST);

        let unknown_user = app
            .oneshot(json_request(
                "/top",
                serde_json::json!({ "username": "nobody", "top_n": 5, "category": "tracks" }),
            ))
            .await
            .unwrap();
        assert_eq!(unknown_user.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_bodies_are_400_with_error_envelope() {
        let (app, pool, _tmp) = test_app().await;
        db::get_or_create_user(&pool, "alice").await.unwrap();

        let bodies = [
            serde_json::json!({ "username": "alice", "top_n": 5 }),
            serde_json::json!({ "username": "alice", "top_n": "five", "category": "tracks" }),
            serde_json::json!({
                "username": "alice",
                "top_n": 5,
                "category": "tracks",
                "start_date": "2024-01-01T00:00:00"
            }),
        ];
        for body in bodies {
            let response = app.clone().oneshot(json_request("/top", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["status"], "error");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/import")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"username\": \"alice\""))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
    }
}
