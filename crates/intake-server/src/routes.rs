//! Admin routes over the engine.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use intake_core::config::SourceConfig;
use intake_core::RawRecord;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// Build the admin router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sources", post(register_source))
        .route("/sources/{id}", delete(unregister_source))
        .route("/sources/{id}/start", post(start_source))
        .route("/sources/{id}/stop", post(stop_source))
        .route("/sources/{id}/pause", post(pause_source))
        .route("/sources/{id}/resume", post(resume_source))
        .route("/sources/{id}/trigger", post(trigger_source))
        .route("/sources/{id}/ingest", post(ingest))
        .route("/records", get(query_records))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

async fn register_source(
    State(state): State<Arc<AppState>>,
    Json(config): Json<SourceConfig>,
) -> Result<StatusCode, ApiError> {
    state.engine.register(config).await?;
    Ok(StatusCode::CREATED)
}

async fn unregister_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.unregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.start_source(&id).await?;
    Ok(Json(json!({"source_id": id, "state": "connecting"})))
}

async fn stop_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.stop_source(&id).await?;
    Ok(Json(json!({"source_id": id, "state": "registered"})))
}

async fn pause_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.pause(&id).await?;
    Ok(Json(json!({"source_id": id, "state": "paused"})))
}

async fn resume_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.resume(&id).await?;
    let phase = state.engine.source_phase(&id)?;
    Ok(Json(json!({"source_id": id, "state": phase.as_str()})))
}

async fn trigger_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.trigger(&id)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct IngestBody {
    records: Vec<Value>,
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<IngestBody>,
) -> Result<Json<Value>, ApiError> {
    let count = body.records.len();
    let records = body
        .records
        .into_iter()
        .map(|payload| RawRecord::new(id.clone(), payload))
        .collect();
    state.engine.ingest(&id, records)?;
    Ok(Json(json!({"accepted": count})))
}

#[derive(Debug, Deserialize)]
struct RecordsQuery {
    source_id: String,
    from:      Option<DateTime<Utc>>,
    to:        Option<DateTime<Utc>>,
}

async fn query_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state
        .engine
        .query_records(&query.source_id, query.from, query.to)
        .await?;
    Ok(Json(json!({"count": records.len(), "records": records})))
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    source_id: Option<String>,
}

async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Json<Value> {
    let snapshot = state.engine.metrics_snapshot(query.source_id.as_deref());
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.engine.health();
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({})))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use intake_core::MetricsRecorder;
    use intake_engine::testing::{Script, ScriptedFactory};
    use intake_engine::{EngineConfig, IngestionEngine};
    use intake_pipeline::{DuplicateStore, InMemoryReferenceLookup};
    use intake_storage::{MemoryStorage, StorageAdapter};
    use tower::util::ServiceExt;

    use super::*;

    fn test_router() -> (Router, Arc<ScriptedFactory>) {
        let storage = Arc::new(MemoryStorage::new());
        let factory = Arc::new(ScriptedFactory::new());
        let engine = IngestionEngine::new(
            EngineConfig {
                scheduler_interval_ms: 20,
                ..EngineConfig::default()
            },
            storage.clone() as Arc<dyn StorageAdapter>,
            storage as Arc<dyn DuplicateStore>,
            Arc::new(InMemoryReferenceLookup::new()),
            factory.clone(),
            MetricsRecorder::new(),
        );
        engine.start();
        (router(Arc::new(AppState { engine })), factory)
    }

    fn register_body(source_id: &str) -> Body {
        Body::from(
            json!({
                "source_id": source_id,
                "source_type": "rest",
                "rest": {"url": "https://api.example.test/records"}
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn register_then_conflict() {
        let (router, factory) = test_router();
        factory.insert("filings", Script::new());

        let created = router
            .clone()
            .oneshot(
                Request::post("/sources")
                    .header("content-type", "application/json")
                    .body(register_body("filings"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);

        let conflict = router
            .oneshot(
                Request::post("/sources")
                    .header("content-type", "application/json")
                    .body(register_body("filings"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_source_is_404() {
        let (router, _factory) = test_router();
        let response = router
            .oneshot(
                Request::post("/sources/nope/start")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lifecycle_violations_are_422() {
        let (router, factory) = test_router();
        factory.insert("filings", Script::new());

        let created = router
            .clone()
            .oneshot(
                Request::post("/sources")
                    .header("content-type", "application/json")
                    .body(register_body("filings"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);

        // Resuming a source that was never paused.
        let response = router
            .oneshot(
                Request::post("/sources/filings/resume")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn health_and_metrics_respond() {
        let (router, _factory) = test_router();

        let health = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(health.status(), StatusCode::OK);

        let metrics = router
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(metrics.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_config_is_422() {
        let (router, _factory) = test_router();
        // rest source without a [rest] section
        let body = Body::from(
            json!({"source_id": "broken", "source_type": "rest"}).to_string(),
        );
        let response = router
            .oneshot(
                Request::post("/sources")
                    .header("content-type", "application/json")
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
