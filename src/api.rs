use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::verify_bearer,
    db,
    models::{ContactPatch, RunState, SyncRequest, SyncRunRecord},
    queries, AppState,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{message}")]
    NotFound {
        code: &'static str,
        message: &'static str,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error("Provide at least one of notes, status or tags")]
    NoUpdates,
    #[error("Sync queue is unavailable")]
    QueueUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::NoUpdates => StatusCode::BAD_REQUEST,
            Self::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound { code, .. } => *code,
            Self::BadRequest(_) => "INVALID_REQUEST",
            Self::NoUpdates => "NO_UPDATES",
            Self::QueueUnavailable => "QUEUE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(err) => {
                error!("Request failed: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (
            self.status(),
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

const PROJECT_NOT_FOUND: ApiError = ApiError::NotFound {
    code: "PROJECT_NOT_FOUND",
    message: "Project not found.",
};
const CONTACT_NOT_FOUND: ApiError = ApiError::NotFound {
    code: "CONTACT_NOT_FOUND",
    message: "Contact not found.",
};
const RUN_NOT_FOUND: ApiError = ApiError::NotFound {
    code: "RUN_NOT_FOUND",
    message: "Sync run not found.",
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/contacts", get(project_contacts))
        .route("/api/contacts/{email}", get(get_contact).patch(update_contact))
        .route("/api/contacts/{email}/interactions", get(contact_interactions))
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/{run_id}", get(get_sync_run))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run `f` against a fresh connection on the blocking pool.
async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
{
    let path = state.config.db_path.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = db::open(&path)?;
        f(&conn)
    })
    .await
    .map_err(|err| ApiError::Internal(anyhow::anyhow!("database task failed: {err}")))?;
    Ok(result?)
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

pub async fn list_projects(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let projects = with_db(&state, queries::list_projects).await?;
    Ok(Json(projects))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = with_db(&state, move |conn| queries::get_project(conn, &id)).await?;
    project.map(Json).ok_or(PROJECT_NOT_FOUND)
}

pub async fn project_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let contacts = with_db(&state, move |conn| {
        if queries::get_project(conn, &id)?.is_none() {
            return Ok(None);
        }
        queries::project_contacts(conn, &id).map(Some)
    })
    .await?;
    contacts.map(Json).ok_or(PROJECT_NOT_FOUND)
}

pub async fn get_contact(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let email = email.trim().to_lowercase();
    let detail = with_db(&state, move |conn| queries::contact_detail(conn, &email)).await?;
    detail.map(Json).ok_or(CONTACT_NOT_FOUND)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionQuery {
    #[serde(default)]
    pub project_id: Option<String>,
}

pub async fn contact_interactions(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Query(query): Query<InteractionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let email = email.trim().to_lowercase();
    let project_id = query.project_id.filter(|p| !p.trim().is_empty());
    let interactions = with_db(&state, move |conn| {
        queries::contact_interactions(conn, &email, project_id.as_deref())
    })
    .await?;
    Ok(Json(interactions))
}

pub async fn update_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(email): Path<String>,
    Json(patch): Json<ContactPatch>,
) -> Result<impl IntoResponse, ApiError> {
    verify_bearer(&headers, state.config.api_key.as_deref())?;

    if patch.is_empty() {
        return Err(ApiError::NoUpdates);
    }

    let email = email.trim().to_lowercase();
    let updated = with_db(&state, move |conn| {
        queries::update_contact_annotations(conn, &email, &patch, Utc::now())
    })
    .await?;
    updated.map(Json).ok_or(CONTACT_NOT_FOUND)
}

pub async fn trigger_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    verify_bearer(&headers, state.config.api_key.as_deref())?;

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice::<SyncRequest>(&body)
            .map_err(|err| ApiError::BadRequest(format!("Invalid sync request: {err}")))?
    };

    let job = state
        .config
        .resolve_job(&request)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let now = Utc::now();
    let run_id = Uuid::new_v4().to_string();
    let record = SyncRunRecord {
        run_id: run_id.clone(),
        created_at: now,
        updated_at: now,
        status: RunState::Queued,
        message: Some("Queued for sync".to_string()),
        job,
        summary: None,
        error: None,
    };
    let response = record.to_response();

    {
        let mut runs = state.runs.write().await;
        runs.insert(run_id.clone(), record);
    }

    if state.queue_tx.send(run_id.clone()).await.is_err() {
        let mut runs = state.runs.write().await;
        runs.remove(&run_id);
        return Err(ApiError::QueueUnavailable);
    }

    info!(run_id = %run_id, project = %response.project_id, "Sync run queued");
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn get_sync_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let runs = state.runs.read().await;
    let response = runs.get(&run_id).map(|run| Json(run.to_response()));
    response.ok_or(RUN_NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        models::{ContactRecord, ProjectDescriptor},
        writer::{write_contacts, ProjectCounts},
    };
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use chrono::TimeZone;
    use serde_json::Value;
    use std::{collections::HashMap, sync::Arc};
    use tokio::sync::{mpsc, RwLock};
    use tower::ServiceExt;

    struct Harness {
        _dir: tempfile::TempDir,
        state: AppState,
        queue_rx: Option<mpsc::Receiver<String>>,
    }

    fn harness(api_key: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("relintel.db"));
        config.api_key = api_key.map(str::to_string);

        let mut conn = db::open(&config.db_path).unwrap();
        let project = ProjectDescriptor {
            id: "cinderella".to_string(),
            name: "Cinderella".to_string(),
            description: "Acquisition".to_string(),
            keywords: vec!["cinderella".to_string(), "ball".to_string()],
        };
        let seen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let contacts = vec![ContactRecord {
            email: "jane@x.com".to_string(),
            name: "Jane".to_string(),
            first_seen: seen,
            last_seen: seen,
        }];
        write_contacts(
            &mut conn,
            &project,
            &contacts,
            ProjectCounts {
                contacts: 1,
                interactions: 0,
            },
            seen,
        )
        .unwrap();

        let (queue_tx, queue_rx) = mpsc::channel(4);
        Harness {
            _dir: dir,
            state: AppState {
                config,
                runs: Arc::new(RwLock::new(HashMap::new())),
                queue_tx,
            },
            queue_rx: Some(queue_rx),
        }
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = router(state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness(None);
        let (status, body) = call(&h.state, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn projects_and_contacts_are_readable() {
        let h = harness(None);

        let (status, body) = call(&h.state, "GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "cinderella");
        assert_eq!(body[0]["keywords"], json!(["cinderella", "ball"]));

        let (status, body) = call(&h.state, "GET", "/api/projects/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "PROJECT_NOT_FOUND");

        let (status, body) =
            call(&h.state, "GET", "/api/projects/cinderella/contacts", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["email"], "jane@x.com");
        assert_eq!(body[0]["interactionCount"], 0);

        let (status, body) = call(&h.state, "GET", "/api/contacts/JANE@x.com", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Jane");
        assert_eq!(body["projects"][0]["id"], "cinderella");

        let (status, body) =
            call(&h.state, "GET", "/api/contacts/jane@x.com/interactions", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = call(&h.state, "GET", "/api/contacts/ghost@x.com", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_updates_annotations_only() {
        let h = harness(None);

        let (status, body) = call(
            &h.state,
            "PATCH",
            "/api/contacts/jane@x.com",
            None,
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "NO_UPDATES");

        let (status, body) = call(
            &h.state,
            "PATCH",
            "/api/contacts/jane@x.com",
            None,
            Some(json!({"status": "warm", "tags": ["lp", "investor"], "name": "Ignored"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "warm");
        assert_eq!(body["tags"], json!(["lp", "investor"]));
        assert_eq!(body["name"], "Jane");

        let (status, _) = call(
            &h.state,
            "PATCH",
            "/api/contacts/ghost@x.com",
            None,
            Some(json!({"notes": "?"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn writes_require_key_when_configured() {
        let h = harness(Some("secret"));

        let (status, body) = call(
            &h.state,
            "PATCH",
            "/api/contacts/jane@x.com",
            None,
            Some(json!({"notes": "met at the ball"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = call(&h.state, "POST", "/api/sync", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &h.state,
            "PATCH",
            "/api/contacts/jane@x.com",
            Some("secret"),
            Some(json!({"notes": "met at the ball"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notes"], "met at the ball");

        let (status, _) = call(&h.state, "GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_is_accepted_and_queued() {
        let mut h = harness(None);

        let (status, body) = call(
            &h.state,
            "POST",
            "/api/sync",
            None,
            Some(json!({"projectId": "glass-slipper", "lookbackDays": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["projectId"], "glass-slipper");

        let run_id = body["runId"].as_str().unwrap().to_string();
        let queued = h.queue_rx.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(queued, run_id);

        let (status, body) =
            call(&h.state, "GET", &format!("/api/sync/{run_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runId"], run_id.as_str());

        let (status, body) = call(&h.state, "GET", "/api/sync/unknown", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "RUN_NOT_FOUND");

        let (status, body) = call(&h.state, "POST", "/api/sync", None, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["projectId"], "cinderella");
    }

    #[tokio::test]
    async fn sync_rejects_out_of_range_lookback() {
        let mut h = harness(None);

        let (status, body) = call(
            &h.state,
            "POST",
            "/api/sync",
            None,
            Some(json!({"lookbackDays": 200_000_000})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert!(h.state.runs.read().await.is_empty());
        assert!(h.queue_rx.as_mut().unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let mut h = harness(None);
        h.queue_rx.take();

        let (status, body) = call(&h.state, "POST", "/api/sync", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "QUEUE_UNAVAILABLE");
        assert!(h.state.runs.read().await.is_empty());
    }
}
