use std::collections::HashMap;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cloud::probes::HttpVerdict;
use crate::error::CloudError;
use crate::oplog::{Action, OperationEntry, Source};
use crate::orchestrator;
use crate::runtime::Runtime;
use crate::status;

/* ============================= DISPATCHER ============================= */

const QUEUE_DEPTH: usize = 64;
const STATUS_PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrchestrationTask {
    pub action: Action,
    pub app_name: String,
    pub source: Source,
}

/// Hands orchestration work to a background worker so request handlers can
/// acknowledge immediately. One worker drains the queue; orchestrations
/// for different applications still overlap through their internal probe
/// parallelism, while the queue bounds memory under a burst.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<OrchestrationTask>,
}

impl Dispatcher {
    pub fn start(rt: Runtime) -> Self {
        let (tx, mut rx) = mpsc::channel::<OrchestrationTask>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                info!(
                    app = %task.app_name,
                    action = %task.action,
                    source = task.source.as_str(),
                    "orchestration_begin"
                );
                match task.action {
                    Action::Start => {
                        let outcome = orchestrator::start_application(&rt, &task.app_name).await;
                        if outcome.success {
                            info!(app = %task.app_name, "orchestration_succeeded");
                        } else {
                            warn!(app = %task.app_name, errors = ?outcome.errors, "orchestration_failed");
                        }
                    }
                    Action::Stop => {
                        let outcome = orchestrator::stop_application(&rt, &task.app_name).await;
                        if outcome.success {
                            info!(app = %task.app_name, "orchestration_succeeded");
                        } else {
                            warn!(app = %task.app_name, errors = ?outcome.errors, "orchestration_failed");
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn enqueue(&self, task: OrchestrationTask) -> Result<(), CloudError> {
        self.tx
            .try_send(task)
            .map_err(|_| CloudError::Transient("orchestration queue unavailable".to_string()))
    }
}

/* ============================= STATE & ROUTER ============================= */

#[derive(Clone)]
pub struct AppState {
    pub rt: Runtime,
    pub dispatcher: Dispatcher,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/apps", get(list_apps))
        .route("/apps/:name", get(get_app))
        .route("/status/quick", get(quick_status_handler))
        .route("/status/:name", get(http_status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .layer(axum::middleware::from_fn(cors))
        .with_state(state)
}

/// Every response carries the open CORS header; OPTIONS preflights are
/// answered before routing.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return (
            StatusCode::OK,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
            ],
        )
            .into_response();
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(json!({ "error": message }))).into_response()
}

/* ============================= STATUS HANDLERS ============================= */

async fn list_apps(State(state): State<AppState>) -> Response {
    match status::aggregate_all(&state.rt).await {
        Ok(apps) => {
            let count = apps.len();
            (StatusCode::OK, Json(json!({ "apps": apps, "count": count }))).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn get_app(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match status::aggregate(&state.rt, &name).await {
        Ok(Some(composite)) => (StatusCode::OK, Json(composite)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, &format!("application {name} not found")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn http_status_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let record = match state.rt.registry.get(&name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, &format!("application {name} not found"));
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let Some(hostname) = record.primary_hostname() else {
        return (
            StatusCode::OK,
            Json(json!({ "app_name": name, "status": "DOWN", "reason": "no hostname configured" })),
        )
            .into_response();
    };

    let outcome = state.rt.prober.head_probe(hostname, STATUS_PROBE_TIMEOUT).await;
    let verdict = if outcome.verdict == HttpVerdict::Up { "UP" } else { "DOWN" };
    (StatusCode::OK, Json(json!({ "app_name": name, "status": verdict }))).into_response()
}

async fn quick_status_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(app) = params.get("app") else {
        return error_response(StatusCode::BAD_REQUEST, "missing app parameter");
    };
    let report = status::quick_status(&state.rt, app).await;
    (StatusCode::OK, Json(report)).into_response()
}

/* ============================= ACTION HANDLERS ============================= */

#[derive(Debug, Deserialize)]
struct ActionRequest {
    app_name: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

async fn start_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<ActionRequest>,
) -> Response {
    let Some(app_name) = body.app_name else {
        return error_response(StatusCode::BAD_REQUEST, "app_name is required");
    };

    let dry_run = body.dry_run || params.get("dry_run").map(String::as_str) == Some("true");
    if dry_run {
        let preview = orchestrator::build_start_preview(&state.rt, &app_name).await;
        return (StatusCode::OK, Json(preview)).into_response();
    }

    accept(&state, Action::Start, app_name).await
}

async fn stop_handler(State(state): State<AppState>, Json(body): Json<ActionRequest>) -> Response {
    let Some(app_name) = body.app_name else {
        return error_response(StatusCode::BAD_REQUEST, "app_name is required");
    };
    accept(&state, Action::Stop, app_name).await
}

/// Acknowledge with 202 and let the worker run the orchestration. The
/// outcome is observable through status reads and the operation log.
async fn accept(state: &AppState, action: Action, app_name: String) -> Response {
    let task = OrchestrationTask { action, app_name: app_name.clone(), source: Source::Api };
    if let Err(e) = state.dispatcher.enqueue(task) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
    }

    let entry = OperationEntry::new(&app_name, action, Source::Api, "operator request");
    if let Err(e) = state.rt.oplog.record(&entry).await {
        warn!(app = %app_name, error = %e, "operation_log_write_failed");
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": format!(
                "{action} operation initiated for {app_name}. Operation is running in the background."
            ),
            "app_name": app_name,
            "status": "accepted",
        })),
    )
        .into_response()
}

/* ============================= SERVE ============================= */

pub async fn serve(rt: Runtime, addr: &str) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::start(rt.clone());
    let app = build_router(AppState { rt, dispatcher });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(addr, "http_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("http_server_shutdown");
        })
        .await?;

    Ok(())
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{record_with_db, runtime_with, FakeHttp, TestFixture};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app_for(fixture: &TestFixture) -> Router {
        let rt = runtime_with(fixture);
        let dispatcher = Dispatcher::start(rt.clone());
        build_router(AppState { rt, dispatcher })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_apps_returns_fleet_with_cors() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        fixture.prober.set("a.example.com", FakeHttp::Code(200));
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/apps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );

        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["apps"][0]["status"], "UP");
    }

    #[tokio::test]
    async fn test_get_app_found() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        fixture.prober.set("a.example.com", FakeHttp::Code(200));
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/apps/a.example.com").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "a.example.com");
        assert_eq!(body["http"]["code"], 200);
        assert_eq!(body["last_checked"], "live");
    }

    #[tokio::test]
    async fn test_get_app_not_found() {
        let fixture = TestFixture::new();
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/apps/ghost.example.com").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_status_endpoint() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        fixture.prober.set("a.example.com", FakeHttp::Code(200));
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/status/a.example.com").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["app_name"], "a.example.com");
        assert_eq!(body["status"], "UP");
    }

    #[tokio::test]
    async fn test_quick_status_endpoint() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status/quick?app=a.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["app"], "a.example.com");
        assert_eq!(body["status"], "UNKNOWN");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_quick_status_requires_app_param() {
        let fixture = TestFixture::new();
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/status/quick").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_accepted_asynchronously() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/start")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"app_name": "a.example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["app_name"], "a.example.com");

        // The acceptance is logged with the api source.
        let entries = fixture.oplog.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, Source::Api);
        assert_eq!(entries[0].action, Action::Start);
    }

    #[tokio::test]
    async fn test_start_dry_run_is_synchronous() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/start?dry_run=true")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"app_name": "a.example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["dry_run"], true);
        assert!(body["summary"].is_object());
        // No orchestration was queued.
        assert!(fixture.oplog.entries().is_empty());
        assert_eq!(fixture.cloud_mutations(), 0);
    }

    #[tokio::test]
    async fn test_start_requires_app_name() {
        let fixture = TestFixture::new();
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/start")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_accepted() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("a.example.com", None, None));
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/stop")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"app_name": "a.example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(fixture.oplog.entries()[0].action, Action::Stop);
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let fixture = TestFixture::new();
        let app = app_for(&fixture);

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/apps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "GET, POST, OPTIONS"
        );
    }

    #[tokio::test]
    async fn test_unknown_route_404_with_cors() {
        let fixture = TestFixture::new();
        let app = app_for(&fixture);

        let response = app
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
