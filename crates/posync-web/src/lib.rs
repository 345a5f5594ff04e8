//! Thin axum trigger surface over the sync engine.
//!
//! Routing and parameter resolution only; every pipeline decision lives in
//! `posync-engine`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use posync_engine::{EntityChoice, RunOptions, RunStatus, SyncService};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

pub const CRATE_NAME: &str = "posync-web";

const SERVICE_NAME: &str = "po-warehouse-sync";
const TCPCHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct AppState {
    pub service: SyncService,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/warehouse-health", get(warehouse_health_handler))
        .route("/tcpcheck", get(tcpcheck_handler))
        .route("/run", get(run_handler).post(run_handler))
        .route("/create-tables", post(create_tables_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: SyncService) -> anyhow::Result<()> {
    let port = service.config().port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web trigger surface listening");
    axum::serve(listener, app(AppState { service })).await?;
    Ok(())
}

async fn root_handler() -> &'static str {
    "po-warehouse-sync up"
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}

async fn warehouse_health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.warehouse_health().await {
        Ok(()) => Json(serde_json::json!({
            "status": "ok",
            "ts": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct TcpCheckQuery {
    host: Option<String>,
    port: Option<u16>,
}

async fn tcpcheck_handler(Query(query): Query<TcpCheckQuery>) -> Response {
    let Some(host) = query.host else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Host required. Pass ?host=...",
            })),
        )
            .into_response();
    };
    let port = query.port.unwrap_or(446);

    match tokio::time::timeout(TCPCHECK_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => Json(serde_json::json!({
            "reachable": true,
            "host": host,
            "port": port,
        }))
        .into_response(),
        Ok(Err(err)) => tcpcheck_failure(&host, port, err.to_string()),
        Err(_elapsed) => tcpcheck_failure(&host, port, "connection timed out".to_string()),
    }
}

fn tcpcheck_failure(host: &str, port: u16, error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "reachable": false,
            "host": host,
            "port": port,
            "error": error,
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize, Default)]
struct RunQuery {
    query_type: Option<String>,
    use_rolling_window: Option<bool>,
    mock: Option<bool>,
    use_merge: Option<bool>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    /// Legacy single-date alias for `start_date`.
    date: Option<NaiveDate>,
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunQuery>,
) -> Response {
    let query_type = query.query_type.as_deref().unwrap_or("both");
    let Some(entity) = EntityChoice::parse(query_type) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "error": format!("unknown query_type `{query_type}`; expected po, breakout or both"),
            })),
        )
            .into_response();
    };

    let rolling = query.use_rolling_window.unwrap_or(true);
    let config = state.service.config();
    let mock = config.use_mock_source || query.mock.unwrap_or(false);

    // explicit mode falls back to yesterday when no date was given
    let start_date = if rolling {
        None
    } else {
        query
            .start_date
            .or(query.date)
            .or_else(|| Some(Utc::now().date_naive() - chrono::Duration::days(1)))
    };

    let opts = RunOptions {
        entity,
        rolling,
        start_date,
        end_date: query.end_date.or(start_date),
        mock,
        use_merge: query.use_merge.unwrap_or(true),
    };

    let report = state.service.run(&opts).await;
    let status = if report.status == RunStatus::Error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

async fn create_tables_handler(State(state): State<Arc<AppState>>) -> Response {
    let created = state.service.create_tables().await;
    Json(serde_json::json!({
        "status": "success",
        "created_tables": created,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use posync_engine::ServiceConfig;
    use posync_warehouse::MemoryWarehouse;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryWarehouse>) {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let service = SyncService::new(
            Arc::new(ServiceConfig::default()),
            warehouse.clone(),
            None,
        );
        (app(AppState { service }), warehouse)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_get_health() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn mock_run_loads_both_entities() {
        let (app, warehouse) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/run?mock=true&use_merge=false")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["results"]["po"]["rows_loaded"], 3);
        assert_eq!(body["results"]["breakout"]["rows_loaded"], 3);
        assert_eq!(warehouse.statements().len(), 0);
    }

    #[tokio::test]
    async fn single_entity_run_reports_only_that_entity() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/run?query_type=po&mock=true&use_merge=false")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["results"]["po"]["status"], "success");
        assert!(body["results"].get("breakout").is_none());
    }

    #[tokio::test]
    async fn unknown_query_type_is_rejected() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/run?query_type=orders")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_source_maps_to_server_error() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/run?mock=false")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn tcpcheck_requires_a_host() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/tcpcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_tables_reports_all_four_tables() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/create-tables")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["created_tables"].as_array().unwrap().len(), 4);
    }
}
