//! Route handlers and server assembly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use seismonet_core::Runtime;
use seismonet_store::EventFilter;

use crate::auth::{authorize, Role};
use crate::error::ApiError;

/// Shared handler state.
pub struct ServerState {
    pub runtime: Arc<Runtime>,
    pub metrics: PrometheusHandle,
}

/// Assemble the router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/events", get(list_events))
        .route("/events/stream", get(stream_events))
        .route("/events/:id", get(get_event))
        .route("/metrics", get(metrics_text))
        .route("/model/reload", post(reload_model))
        .route("/caches/purge", post(purge_caches))
        .route("/store/compact", post(compact_store))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves. A bind failure is surfaced to
/// the caller (exit code 4 at the process boundary).
pub async fn serve(
    state: Arc<ServerState>,
    bind: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("bind {}: {}", bind, e))?;
    info!("http api listening on {}", bind);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("serve: {}", e))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn ready(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.runtime.is_ready() {
        (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ready"})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "initializing"})),
        )
    }
}

async fn list_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(filter): Query<EventFilter>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&headers, &state.runtime.config.server.jwt, Role::Viewer)?;
    let events = state.runtime.store.query(&filter)?;
    Ok(Json(serde_json::json!({
        "count": events.len(),
        "events": events,
        "stats": state.runtime.store.stats(),
    })))
}

async fn get_event(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&headers, &state.runtime.config.server.jwt, Role::Viewer)?;
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::bad_request("malformed event id"))?;
    let event = state.runtime.store.get_by_id(id)?;
    Ok(Json(event))
}

#[derive(Debug, serde::Deserialize)]
struct StreamQuery {
    cursor: Option<u64>,
}

/// Live tail over SSE. Resume via `Last-Event-ID` (standard SSE reconnect)
/// or an explicit `cursor` query parameter; event ids are store cursors.
async fn stream_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    authorize(&headers, &state.runtime.config.server.jwt, Role::Viewer)?;

    let cursor = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .or(query.cursor)
        .unwrap_or(0);

    let tail = state.runtime.store.tail(cursor);
    let stream = futures_util::stream::unfold(tail, |mut tail| async move {
        let (cursor, event) = tail.next().await?;
        let sse_event = Event::default()
            .id(cursor.to_string())
            .event("classified")
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().comment("serialization failure"));
        Some((Ok::<Event, Infallible>(sse_event), tail))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn metrics_text(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics.render()
}

async fn reload_model(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &state.runtime.config.server.jwt, Role::Operator)?;
    let version = state
        .runtime
        .artifact_slot
        .reload(&state.runtime.config.model.path)?;
    info!(by = %claims.sub, %version, "model reloaded");
    Ok(Json(serde_json::json!({"reloaded": true, "version": version})))
}

async fn purge_caches(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &state.runtime.config.server.jwt, Role::Admin)?;
    let dropped = state.runtime.purge_caches();
    info!(by = %claims.sub, dropped, "caches purged");
    Ok(Json(serde_json::json!({"purged": dropped})))
}

#[derive(Debug, serde::Deserialize)]
struct CompactQuery {
    /// Drop events with trigger instant before this cutoff
    before: chrono::DateTime<chrono::Utc>,
}

async fn compact_store(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<CompactQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &state.runtime.config.server.jwt, Role::Admin)?;
    let removed = state.runtime.store.compact(query.before).await?;
    info!(by = %claims.sub, removed, cutoff = %query.before, "store compacted");
    Ok(Json(serde_json::json!({"removed": removed})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use seismonet_core::config::AppConfig;
    use seismonet_core::Runtime;
    use seismonet_ml::ModelArtifact;
    use seismonet_models::FeatureSchema;
    use tower::ServiceExt;

    fn artifact_json() -> Vec<u8> {
        let dim = FeatureSchema::v1().dimension();
        serde_json::to_vec(&serde_json::json!({
            "version": "srv-1",
            "schema_id": "seismonet.fv.v1",
            "labels": ["earthquake", "explosion", "volcanic", "noise"],
            "classifier": {
                "kind": "logistic",
                "weights": [vec![0.0; dim], vec![0.0; dim], vec![0.0; dim], vec![0.0; dim]],
                "bias": [0.0, 0.0, 0.0, 0.0],
                "calibration": {"a": 1.0, "b": 0.0}
            },
            "magnitude": {
                "weights": vec![0.0; dim],
                "bias": 1.0,
                "residuals": [-0.1, 0.0, 0.1],
                "scale": "ml"
            }
        }))
        .unwrap()
    }

    async fn test_state(dir: &std::path::Path) -> Arc<ServerState> {
        let model_path = dir.join("artifact.json");
        std::fs::write(&model_path, artifact_json()).unwrap();
        // Sanity: the fixture must be a loadable artifact.
        ModelArtifact::load(&model_path).unwrap();

        let config_toml = format!(
            r#"
[catalog]
base_url = "https://catalog.example/query"

[waveform]
base_url = "https://waveform.example/query"

[model]
path = "{}"

[store]
dir = "{}"

[server.jwt]
secret = "test-secret"
"#,
            model_path.display(),
            dir.join("store").display()
        );
        let config_path = dir.join("config.toml");
        std::fs::write(&config_path, config_toml).unwrap();

        let config = AppConfig::load(&config_path).unwrap();
        let runtime = Runtime::initialize(config).await.unwrap();
        let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        Arc::new(ServerState { runtime, metrics })
    }

    #[tokio::test]
    async fn health_is_open_and_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_503_until_marked() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let app = build_router(state.clone());
        let response = app
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.runtime.mark_ready();
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_require_a_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()).await);
        let response = app
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn model_reload_rejects_viewers() {
        use jsonwebtoken::{encode, EncodingKey, Header};
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()).await);

        let claims = crate::auth::Claims {
            sub: "viewer@example".to_string(),
            role: Role::Viewer,
            iss: "seismonet".to_string(),
            aud: "seismonet-api".to_string(),
            exp: (chrono::Utc::now().timestamp() + 600) as u64,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let response = app
            .oneshot(
                Request::post("/model/reload")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
