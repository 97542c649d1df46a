// HTTP route handlers for the Verdict API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use verdict_common::types::{ExecutionRequest, TestResult};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub total: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// POST /execute - Run a submission against its test cases
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecutionRequest>,
) -> Response {
    let start_time = Instant::now();

    match state.engine.execute_code(&request).await {
        Ok(results) => {
            let passed = results.iter().filter(|r| r.passed).count();
            let total = results.len();
            let elapsed = start_time.elapsed();
            metrics::record_execution("completed", passed, total - passed, elapsed.as_secs_f64());

            info!(
                language = %request.language,
                passed = passed,
                total = total,
                duration_ms = elapsed.as_millis() as u64,
                "Submission evaluated"
            );

            (
                StatusCode::OK,
                Json(ExecuteResponse {
                    results,
                    passed,
                    total,
                    duration_ms: elapsed.as_millis() as u64,
                    completed_at: Utc::now(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            metrics::record_execution(e.kind(), 0, 0, start_time.elapsed().as_secs_f64());

            let status = if e.is_caller_error() {
                warn!(error = %e, kind = e.kind(), "Submission rejected");
                StatusCode::BAD_REQUEST
            } else {
                error!(error = %e, kind = e.kind(), "Submission could not be run");
                StatusCode::INTERNAL_SERVER_ERROR
            };

            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                    kind: e.kind(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /languages - Configured runtimes
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<_> = state
        .engine
        .languages()
        .configs()
        .into_iter()
        .map(|config| {
            serde_json::json!({
                "name": config.name,
                "strategy": config.strategy,
                "timeoutMs": config.timeout_ms,
                "allowsPackages": config.allows_packages,
            })
        })
        .collect();

    Json(serde_json::json!({ "languages": languages }))
}

/// GET /packages - Packages submissions may request
pub async fn list_packages(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.registry().available().await {
        Ok(packages) => Json(serde_json::json!({ "packages": packages })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list package registry");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                    kind: e.kind(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{json, Value};
    use verdict_common::types::{SourceFile, TestCase};
    use verdict_engine::{EngineSettings, ExecutionEngine, LanguageConfigManager};

    fn state(scratch: &std::path::Path, registry: &std::path::Path) -> Arc<AppState> {
        let settings = EngineSettings {
            scratch_root: scratch.to_path_buf(),
            package_registry: registry.to_path_buf(),
            ..EngineSettings::default()
        };
        let engine = ExecutionEngine::new(settings, LanguageConfigManager::builtin()).unwrap();
        Arc::new(AppState { engine })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_execute_returns_results() {
        let scratch = tempfile::tempdir().unwrap();
        let registry = tempfile::tempdir().unwrap();
        let request = ExecutionRequest {
            files: vec![SourceFile::new("index.js", "function solution(x) { return x + 1; }")],
            language: "javascript".to_string(),
            test_cases: Some(vec![TestCase::new(json!(1), json!(2)), TestCase::new(json!(1), json!(3))]),
            packages: Vec::new(),
            database: None,
        };

        let response = execute_code(State(state(scratch.path(), registry.path())), Json(request)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["passed"], 1);
        assert_eq!(body["total"], 2);
        assert_eq!(body["results"][0]["output"], "2");
        assert_eq!(body["results"][1]["passed"], false);
    }

    #[tokio::test]
    async fn test_caller_errors_are_bad_request() {
        let scratch = tempfile::tempdir().unwrap();
        let registry = tempfile::tempdir().unwrap();
        let request = ExecutionRequest {
            files: vec![SourceFile::new("index.js", "function solution() {}")],
            language: "javascript".to_string(),
            test_cases: Some(Vec::new()),
            packages: vec!["left-pad-evil".to_string()],
            database: None,
        };

        let response = execute_code(State(state(scratch.path(), registry.path())), Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["kind"], "unauthorized_package");
        assert_eq!(body["error"], "Execution failed: Package left-pad-evil not allowed");
    }

    #[tokio::test]
    async fn test_packages_lists_registry() {
        let scratch = tempfile::tempdir().unwrap();
        let registry = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(registry.path().join("lodash")).unwrap();

        let response = list_packages(State(state(scratch.path(), registry.path()))).await;
        let body = body_json(response).await;
        assert_eq!(body["packages"], json!(["lodash"]));
    }
}
