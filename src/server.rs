//! HTTP surface of the collector.
//!
//! JSON and plaintext endpoints over any [`MetricStore`]. Request bodies may
//! be gzip-compressed.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    decompression::RequestDecompressionLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::model::{MetricKind, WireItem};
use crate::storage::{MetricStore, StorageError};

/// Shared store handed to every handler.
pub type AppState = Arc<dyn MetricStore>;

/// Body of `POST /value/`.
#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// Handler error rendered as a plaintext response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::Validation(_) | StorageError::InvalidBatch(_) => StatusCode::BAD_REQUEST,
            StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Storage operation failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Create the Axum router with all routes.
pub fn create_router(store: AppState) -> Router {
    Router::new()
        .route("/", get(list_handler))
        .route("/ping", get(ping_handler))
        .route("/update/", post(update_json_handler))
        .route("/update/:kind/:name/:value", post(update_plain_handler))
        .route("/updates/", post(update_all_handler))
        .route("/value/", post(value_json_handler))
        .route("/value/:kind/:name", get(value_plain_handler))
        .layer(RequestDecompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(store)
}

/// Serve `store` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    store: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn parse_kind(raw: &str) -> Result<MetricKind, ApiError> {
    raw.parse::<MetricKind>()
        .map_err(|_| ApiError::bad_request(format!("unknown metric type '{raw}'")))
}

/// Plaintext rendering of a stored value.
fn plain_value(item: &WireItem) -> String {
    match item.kind {
        MetricKind::Gauge => item.value.map(|v| v.to_string()).unwrap_or_default(),
        MetricKind::Counter => item.delta.map(|d| d.to_string()).unwrap_or_default(),
    }
}

async fn list_handler(State(store): State<AppState>) -> Result<Json<Vec<WireItem>>, ApiError> {
    let snapshot = store.get_metrics().await?;
    Ok(Json(snapshot.to_wire_items()))
}

async fn ping_handler(State(store): State<AppState>) -> Response {
    match store.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Apply one JSON item and answer with the stored value.
async fn update_json_handler(
    State(store): State<AppState>,
    body: Result<Json<WireItem>, JsonRejection>,
) -> Result<Json<WireItem>, ApiError> {
    let Json(item) = body?;
    store.apply(&item).await?;
    let stored = store.get_metric(item.kind, &item.id).await?;
    Ok(Json(stored))
}

async fn update_plain_handler(
    State(store): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    match parse_kind(&kind)? {
        MetricKind::Gauge => {
            let value = value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ApiError::bad_request(format!("invalid gauge value '{value}'")))?;
            store.update_gauge(&name, value).await?;
        }
        MetricKind::Counter => {
            let delta = value
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("invalid counter value '{value}'")))?;
            store.update_counter(&name, delta).await?;
        }
    }
    Ok(StatusCode::OK)
}

async fn update_all_handler(
    State(store): State<AppState>,
    body: Result<Json<Vec<WireItem>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(items) = body?;
    store.update_all(&items).await?;
    tracing::debug!(items = items.len(), "Batch applied");
    Ok(StatusCode::OK)
}

async fn value_json_handler(
    State(store): State<AppState>,
    body: Result<Json<ValueRequest>, JsonRejection>,
) -> Result<Json<WireItem>, ApiError> {
    let Json(request) = body?;
    let item = store.get_metric(request.kind, &request.id).await?;
    Ok(Json(item))
}

async fn value_plain_handler(
    State(store): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let item = store.get_metric(parse_kind(&kind)?, &name).await?;
    Ok(plain_value(&item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (create_router(store.clone()), store)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    // =========================================================================
    // Plaintext endpoints
    // =========================================================================

    #[tokio::test]
    async fn test_plain_update_and_value() {
        let (app, store) = app();

        let (status, _) = send(app.clone(), Method::POST, "/update/gauge/temp/23.5", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app.clone(), Method::POST, "/update/counter/reqs/4", None).await;
        assert_eq!(status, StatusCode::OK);
        send(app.clone(), Method::POST, "/update/counter/reqs/6", None).await;

        let (status, body) = send(app.clone(), Method::GET, "/value/gauge/temp", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "23.5");
        let (_, body) = send(app, Method::GET, "/value/counter/reqs", None).await;
        assert_eq!(body, "10");

        assert_eq!(store.snapshot().counters["reqs"], 10);
    }

    #[tokio::test]
    async fn test_plain_update_rejects_bad_input() {
        let (app, _) = app();

        let cases = [
            "/update/histogram/x/1",
            "/update/gauge/x/abc",
            "/update/gauge/x/NaN",
            "/update/counter/x/1.5",
        ];
        for uri in cases {
            let (status, _) = send(app.clone(), Method::POST, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_plain_value_missing() {
        let (app, _) = app();
        let (status, _) = send(app.clone(), Method::GET, "/value/gauge/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(app, Method::GET, "/value/bogus/nope", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // =========================================================================
    // JSON endpoints
    // =========================================================================

    #[tokio::test]
    async fn test_json_update_returns_stored_total() {
        let (app, _) = app();
        let body = r#"{"id":"hits","type":"counter","delta":3}"#;

        send(app.clone(), Method::POST, "/update/", Some(body)).await;
        let (status, response) = send(app, Method::POST, "/update/", Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        let item: WireItem = serde_json::from_str(&response).unwrap();
        assert_eq!(item, WireItem::counter("hits", 6));
    }

    #[tokio::test]
    async fn test_json_update_rejects_mismatch() {
        let (app, _) = app();
        let (status, _) = send(
            app.clone(),
            Method::POST,
            "/update/",
            Some(r#"{"id":"x","type":"gauge","delta":1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, Method::POST, "/update/", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_updates_batch_and_listing() {
        let (app, _) = app();
        let body = r#"[
            {"id":"b","type":"gauge","value":2.0},
            {"id":"a","type":"gauge","value":1.0},
            {"id":"n","type":"counter","delta":7}
        ]"#;
        let (status, _) = send(app.clone(), Method::POST, "/updates/", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        let items: Vec<WireItem> = serde_json::from_str(&body).unwrap();
        assert_eq!(
            items,
            vec![
                WireItem::gauge("a", 1.0),
                WireItem::gauge("b", 2.0),
                WireItem::counter("n", 7),
            ]
        );
    }

    #[tokio::test]
    async fn test_updates_reports_invalid_items() {
        let (app, store) = app();
        let body = r#"[
            {"id":"ok","type":"gauge","value":1.0},
            {"id":"broken","type":"counter","value":1.0}
        ]"#;
        let (status, message) = send(app, Method::POST, "/updates/", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("broken"), "{message}");
        assert_eq!(store.snapshot().gauges["ok"], 1.0);
    }

    #[tokio::test]
    async fn test_value_json() {
        let (app, store) = app();
        store.set_gauge("load", 0.75);

        let (status, body) = send(
            app.clone(),
            Method::POST,
            "/value/",
            Some(r#"{"id":"load","type":"gauge"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let item: WireItem = serde_json::from_str(&body).unwrap();
        assert_eq!(item, WireItem::gauge("load", 0.75));

        let (status, _) = send(
            app,
            Method::POST,
            "/value/",
            Some(r#"{"id":"load","type":"counter"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_gzip_request_body() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let (app, store) = app();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"[{"id":"z","type":"gauge","value":9.5}]"#)
            .unwrap();
        let compressed = encoder.finish().unwrap();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/updates/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(compressed))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.snapshot().gauges["z"], 9.5);
    }

    #[tokio::test]
    async fn test_ping_without_database_fails() {
        let (app, _) = app();
        let (status, body) = send(app, Method::GET, "/ping", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("unavailable"), "{body}");
    }
}
