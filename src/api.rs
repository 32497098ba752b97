use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::IdentityMode;
use crate::error::StoreError;
use crate::models::{SubtaskId, TaskId, UserId};
use crate::query::TaskQuery;
use crate::store::{TaskEdit, TaskStore};

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const USER_HEADER: &str = "x-user-id";
/// Identity of every request in single-user mode.
pub const LOCAL_USER: &str = "local";

#[derive(Clone)]
pub struct AppState {
    pub store: TaskStore,
    pub identity: IdentityMode,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/:task_id",
            get(get_task)
                .put(toggle_task)
                .patch(edit_task)
                .delete(delete_task),
        )
        .route("/api/tasks/:task_id/subtasks", post(add_subtask))
        .route(
            "/api/tasks/:task_id/subtasks/:subtask_id",
            put(toggle_subtask).delete(remove_subtask),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            format!("missing {USER_HEADER} header"),
        )
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "an internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            StoreError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            StoreError::ParentNotFound(message) => {
                Self::new(StatusCode::NOT_FOUND, "PARENT_NOT_FOUND", message)
            }
            StoreError::StorageUnavailable(detail) => {
                error!(error = %detail, "storage unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_UNAVAILABLE",
                    "task storage is unavailable",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Identity
// =============================================================================

/// The authenticated caller. Credentials are checked upstream; this only
/// reads the resolved identity.
pub struct CurrentUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match state.identity {
            IdentityMode::SingleUser => Ok(Self(UserId::new(LOCAL_USER))),
            IdentityMode::MultiUser => parts
                .headers
                .get(USER_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| Self(UserId::new(value)))
                .ok_or_else(ApiError::unauthenticated),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// `Json` whose rejections use the API error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct AppJson<T>(T);

/// `Query` whose rejections use the API error body.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
struct AppQuery<T>(T);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    search: Option<String>,
    filter: Option<String>,
    sort_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    text: String,
    priority: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTaskRequest {
    text: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddSubtaskRequest {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    user_id: UserId,
    mode: &'static str,
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(StatusResponse {
        user_id: user,
        mode: state.identity.as_str(),
    })
}

async fn list_tasks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = TaskQuery::parse(
        params.search.as_deref(),
        params.filter.as_deref(),
        params.sort_by.as_deref(),
    )?;
    let store = state.store;
    let tasks = run_blocking(move || store.list_tasks(&user, Some(&query))).await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(request): AppJson<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    let task = run_blocking(move || {
        store.create_task(
            &user,
            &request.text,
            request.priority.as_deref(),
            request.due_date.as_deref(),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    let task = run_blocking(move || store.get_task(&user, &TaskId(task_id))).await?;
    Ok(Json(task))
}

async fn toggle_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    let task = run_blocking(move || store.toggle_task(&user, &TaskId(task_id))).await?;
    Ok(Json(task))
}

async fn edit_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<String>,
    AppJson(request): AppJson<EditTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let edit = TaskEdit {
        text: request.text,
        priority: request.priority,
        due_date: request.due_date,
    };
    let store = state.store;
    let task = run_blocking(move || store.edit_task(&user, &TaskId(task_id), edit)).await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    run_blocking(move || store.delete_task(&user, &TaskId(task_id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_subtask(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(task_id): Path<String>,
    AppJson(request): AppJson<AddSubtaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    let subtask =
        run_blocking(move || store.add_subtask(&user, &TaskId(task_id), &request.text)).await?;
    Ok((StatusCode::CREATED, Json(subtask)))
}

async fn toggle_subtask(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((task_id, subtask_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    let subtask = run_blocking(move || {
        store.toggle_subtask(&user, &TaskId(task_id), &SubtaskId(subtask_id))
    })
    .await?;
    Ok(Json(subtask))
}

async fn remove_subtask(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((task_id, subtask_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store;
    run_blocking(move || {
        store.remove_subtask(&user, &TaskId(task_id), &SubtaskId(subtask_id))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs a store call on the blocking pool; SQLite and file I/O are synchronous.
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            error!(error = %err, "store call did not complete");
            Err(ApiError::internal())
        }
    }
}
