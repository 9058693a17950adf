//! Admin HTTP API: JSON decommission endpoints, the encoded
//! [`zonal_admin_api`] RPC endpoint and the Prometheus metrics.

use {
    crate::{DecommissionService, Node},
    axum::{
        body::Bytes,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{delete, get, post, put},
        Json,
        Router,
    },
    metrics_exporter_prometheus::PrometheusHandle,
    serde::{Deserialize, Serialize},
    std::time::Duration,
    zonal_admin_api::{
        ApiError,
        GetDecommissionResponse,
        Handler,
        PutDecommissionRequest,
        Server as _,
    },
};

/// Request timeout if none is provided.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct AppState {
    node: Node,
    rpc: Handler<DecommissionService>,
    prometheus: PrometheusHandle,
}

pub fn router(node: Node, prometheus: PrometheusHandle) -> Router {
    let state = AppState {
        rpc: node.decommission().clone().into_handler(),
        node,
        prometheus,
    };

    Router::new()
        .route(
            "/_cluster/decommission/awareness/:name/:value",
            put(put_decommission),
        )
        .route(
            "/_cluster/decommission/awareness/:name/_status",
            get(get_decommission),
        )
        .route("/_cluster/decommission/awareness", delete(delete_decommission))
        .route("/rpc", post(rpc))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Query of a decommission request. Timeouts are in seconds.
#[derive(Debug, Default, Deserialize)]
struct PutParams {
    timeout: Option<u64>,
    delay_timeout: Option<u64>,
    no_delay: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

async fn put_decommission(
    State(state): State<AppState>,
    Path((name, value)): Path<(String, String)>,
    Query(params): Query<PutParams>,
) -> Response {
    let timeout = params
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let mut req = PutDecommissionRequest::new(name, value).with_timeout(timeout);

    match (params.no_delay, params.delay_timeout) {
        (Some(true), None) => req = req.with_no_delay(),
        (no_delay, delay_timeout) => {
            req.no_delay = no_delay.unwrap_or(false);
            if let Some(secs) = delay_timeout {
                req.delay_timeout = Duration::from_secs(secs);
            }
        }
    }

    respond(state.node.decommission().put_decommission(req).await)
}

/// Returns the decommission of the awareness attribute, empty if the
/// current decommission is of another attribute.
async fn get_decommission(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let result = state
        .node
        .decommission()
        .get_decommission()
        .await
        .map(|resp| {
            if resp.awareness.contains_key(&name) {
                resp
            } else {
                GetDecommissionResponse::default()
            }
        });

    respond(result)
}

async fn delete_decommission(State(state): State<AppState>) -> Response {
    respond(state.node.decommission().delete_decommission().await)
}

async fn rpc(State(state): State<AppState>, body: Bytes) -> Response {
    match state.rpc.handle(&body).await {
        Ok(bytes) => bytes.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            tracing::warn!(%err, "admin request failed");

            let status = match &err {
                ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ApiError::Conflict(_) => StatusCode::CONFLICT,
                ApiError::NotClusterManager { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };

            let body = ErrorBody {
                retryable: err.is_retryable(),
                error: err.to_string(),
            };

            (status, Json(body)).into_response()
        }
    }
}
