use {
    axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    },
    futures::Future,
    metrics_exporter_prometheus::PrometheusBuilder,
    serde_json::{json, Value},
    std::time::Duration,
    tower::ServiceExt as _,
    zonal_admin_api::{
        client::{self, Transport, TransportError},
        Client,
        DecommissionStatus as ApiStatus,
        PutDecommissionRequest,
    },
    zonal_core::decommission::DecommissionStatus,
    zonal_node::{admin, Config, Node},
};

const LOCAL: &str = "zone_3-node0";

fn config() -> Config {
    let mut vars = vec![
        ("ZONAL_NODE_ID".to_string(), LOCAL.to_string()),
        ("ZONAL_NODE_ATTRIBUTES".to_string(), "zone=zone_3".to_string()),
        ("ZONAL_INDICES".to_string(), "idx:3:2".to_string()),
        ("ZONAL_AWARENESS_ATTRIBUTES".to_string(), "zone".to_string()),
        (
            "ZONAL_FORCE_ZONE_VALUES".to_string(),
            "zone_1,zone_2,zone_3".to_string(),
        ),
        ("ZONAL_DRAIN_TIMEOUT".to_string(), "5000".to_string()),
    ];

    for zone in ["zone_1", "zone_2", "zone_3"] {
        for idx in 0..5 {
            let id = format!("{zone}-node{idx}");
            if id != LOCAL {
                vars.push((
                    format!("ZONAL_PEER_{id}"),
                    format!("cluster_manager,data;zone={zone}"),
                ));
            }
        }
    }

    Config::from_vars(vars).unwrap()
}

async fn setup() -> (Config, Node, Router) {
    let cfg = config();
    let node = Node::bootstrap(&cfg).await.unwrap();
    let router = admin::router(node.clone(), PrometheusBuilder::new().build_recorder().handle());
    (cfg, node, router)
}

async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();

    (status, serde_json::from_slice(&body).unwrap())
}

#[test_log::test(tokio::test)]
async fn decommission_over_http() {
    let (cfg, node, router) = setup().await;
    assert_eq!(node.state().nodes().len(), 15);

    let (status, body) = call(&router, Method::PUT, "/_cluster/decommission/awareness/zone/zone_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "acknowledged": true }));

    let terminal = node
        .decommission()
        .wait_for_terminal(Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(terminal, DecommissionStatus::Successful);
    assert_eq!(node.state().nodes().len(), 10);

    let (status, body) = call(&router, Method::GET, "/_cluster/decommission/awareness/zone/_status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "awareness": { "zone": "zone_1" }, "status": "successful" }));

    let (_, body) = call(&router, Method::GET, "/_cluster/decommission/awareness/rack/_status").await;
    assert_eq!(body, json!({ "awareness": {}, "status": null }));

    let (status, body) = call(&router, Method::PUT, "/_cluster/decommission/awareness/zone/zone_2").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], json!(false));

    // Decommissioned peers can't join back until the decommission is deleted.
    assert_eq!(node.rejoin_peers(&cfg.peers).await.unwrap(), 0);

    let (status, body) = call(&router, Method::DELETE, "/_cluster/decommission/awareness").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "acknowledged": true }));

    let (_, body) = call(&router, Method::GET, "/_cluster/decommission/awareness/zone/_status").await;
    assert_eq!(body, json!({ "awareness": {}, "status": null }));

    assert_eq!(node.rejoin_peers(&cfg.peers).await.unwrap(), 5);
    assert_eq!(node.state().nodes().len(), 15);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (_, node, router) = setup().await;

    for uri in [
        "/_cluster/decommission/awareness/zone/zone_9",
        "/_cluster/decommission/awareness/rack/rack_1",
        "/_cluster/decommission/awareness/zone/zone_1?timeout=10",
        "/_cluster/decommission/awareness/zone/zone_1?no_delay=true&delay_timeout=5",
    ] {
        let (status, body) = call(&router, Method::PUT, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {body}");
        assert_eq!(body["retryable"], json!(false));
    }

    assert!(node.decommission().get_decommission_state().is_none());
    assert_eq!(node.state().nodes().len(), 15);
}

#[derive(Clone)]
struct Http(std::sync::Arc<std::sync::Mutex<Router>>);

impl Transport for Http {
    fn call(
        &self,
        _node: &str,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send {
        let router = self.0.lock().unwrap().clone();

        async move {
            let req = Request::post("/rpc")
                .body(Body::from(request))
                .map_err(|err| TransportError(err.to_string()))?;

            let resp = router
                .oneshot(req)
                .await
                .map_err(|err| TransportError(err.to_string()))?;

            if !resp.status().is_success() {
                return Err(TransportError(format!("HTTP {}", resp.status())));
            }

            hyper::body::to_bytes(resp.into_body())
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|err| TransportError(err.to_string()))
        }
    }
}

#[tokio::test]
async fn client_talks_to_the_rpc_endpoint() {
    let (_, node, router) = setup().await;
    let client = Client::new(Http(std::sync::Arc::new(std::sync::Mutex::new(router))), client::Config::new(LOCAL));

    assert_eq!(client.get_decommission().await.unwrap().status, None);

    let resp = client
        .put_decommission(PutDecommissionRequest::new("zone", "zone_2").with_no_delay())
        .await
        .unwrap();
    assert!(resp.acknowledged);

    node.decommission()
        .wait_for_terminal(Duration::from_secs(10))
        .await
        .unwrap();

    let resp = client.get_decommission().await.unwrap();
    assert_eq!(resp.status, Some(ApiStatus::Successful));
    assert_eq!(resp.awareness.get("zone").map(String::as_str), Some("zone_2"));
}

#[tokio::test]
async fn metrics_are_served() {
    let (_, _, router) = setup().await;

    let req = Request::get("/metrics").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn reload_applies_placement_settings() {
    let (mut cfg, node, _) = setup().await;

    cfg.awareness_attributes = vec!["zone".into(), "rack".into()];
    cfg.placement.skewness_limit = Some(1);
    node.reload(&cfg).await.unwrap();

    assert_eq!(node.allocator().catalog().snapshot().names(), ["zone", "rack"]);
    assert_eq!(node.allocator().settings().get().skewness_limit, Some(1));
    assert_eq!(node.state().nodes().len(), 15);
}
