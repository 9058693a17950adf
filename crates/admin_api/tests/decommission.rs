use {
    std::{collections::HashMap, future::Future, sync::Arc, time::Duration},
    zonal_admin_api::{
        client::{self, Transport, TransportError},
        ApiError,
        Client,
        DecommissionStatus,
        Handler,
        PutDecommissionRequest,
        Server as _,
    },
    zonal_core::{
        cluster::{test_util, ClusterService, RoutingTable},
        decommission::{self, Controller},
        AttributeCatalog,
        Allocator,
        AwarenessAttributes,
        LocalCoordinator,
        LocalMembership,
        Setting,
        StateUpdater as _,
    },
};

type Service = decommission::Service<
    ClusterService,
    LocalCoordinator<ClusterService>,
    LocalMembership<ClusterService>,
>;

/// Routes requests to in-process handlers by node id.
#[derive(Clone, Default)]
struct InMemory {
    handlers: Arc<HashMap<String, Handler<Service>>>,
}

impl Transport for InMemory {
    fn call(
        &self,
        node: &str,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send {
        let handler = self.handlers.get(node).cloned();
        let node = node.to_string();

        async move {
            let handler = handler.ok_or_else(|| TransportError(format!("unknown node {node}")))?;
            handler
                .handle(&request)
                .await
                .map_err(|err| TransportError(err.to_string()))
        }
    }
}

struct Cluster {
    updater: ClusterService,
    transport: InMemory,
}

impl Cluster {
    /// 3 zones of 5 nodes, serving the Admin API on the first node of every
    /// zone. `zone_1-node0` is the cluster manager.
    fn new() -> Self {
        let catalog = AttributeCatalog::new(
            AwarenessAttributes::new([test_util::ZONE])
                .with_forced_values(test_util::ZONE, ["zone_1", "zone_2", "zone_3"]),
        );
        let allocator = Allocator::new(catalog.clone(), Setting::default());

        let state = test_util::zoned_cluster(&[("zone_1", 5), ("zone_2", 5), ("zone_3", 5)])
            .with_routing_table(RoutingTable::default().with_index("idx", 2, 2));
        let state = allocator.reroute(&state).unwrap_or(state);
        let updater = ClusterService::spawn(state);

        let handlers = ["zone_1-node0", "zone_2-node0", "zone_3-node0"]
            .into_iter()
            .map(|id| {
                let controller = Controller::new(
                    updater.clone(),
                    LocalCoordinator::new(updater.clone()),
                    LocalMembership::new(updater.clone(), allocator.clone()),
                );
                let service = Service::new(
                    id.into(),
                    catalog.clone(),
                    controller,
                    decommission::Config::default(),
                );
                (id.to_string(), service.into_handler())
            })
            .collect();

        Self {
            updater,
            transport: InMemory {
                handlers: Arc::new(handlers),
            },
        }
    }

    fn client(&self, server: &str) -> Client<InMemory> {
        Client::new(self.transport.clone(), client::Config::new(server))
    }
}

async fn wait_for_terminal(client: &Client<InMemory>) -> DecommissionStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.get_decommission().await.unwrap().status {
                Some(status) if status.is_terminal() => return status,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .unwrap()
}

#[test_log::test(tokio::test)]
async fn client_follows_the_cluster_manager() {
    let cluster = Cluster::new();
    let client = cluster.client("zone_1-node0");

    let req = PutDecommissionRequest::new(test_util::ZONE, "zone_1")
        .with_no_delay()
        .with_retry_on_cluster_manager_switch();
    let resp = client.put_decommission(req).await.unwrap();
    assert!(resp.acknowledged);

    let client = cluster.client("zone_3-node0");
    assert_eq!(wait_for_terminal(&client).await, DecommissionStatus::Successful);

    let resp = client.get_decommission().await.unwrap();
    assert_eq!(
        serde_json::to_value(&resp).unwrap(),
        serde_json::json!({ "awareness": { "zone": "zone_1" }, "status": "successful" })
    );

    let state = cluster.updater.state();
    assert_eq!(state.nodes().len(), 10);
    assert!(test_util::ids_in_zone(&state, "zone_1").is_empty());

    // `zone_2-node0` took over.
    let client = cluster.client("zone_2-node0");
    assert!(client.delete_decommission().await.unwrap().acknowledged);
    assert_eq!(client.get_decommission().await.unwrap(), Default::default());
}

#[tokio::test]
async fn leadership_change_is_reported_without_opt_in() {
    let cluster = Cluster::new();
    let client = cluster.client("zone_1-node0");

    let req = PutDecommissionRequest::new(test_util::ZONE, "zone_1");
    let err = match client.put_decommission(req).await {
        Err(client::Error::Api(err)) => err,
        res => panic!("unexpected result: {res:?}"),
    };

    assert!(err.is_retryable());
    assert_eq!(err, ApiError::NotClusterManager {
        node: "zone_1-node0".into(),
        manager: Some("zone_2-node0".into()),
    });

    let status = client.get_decommission().await.unwrap().status;
    assert_eq!(status, Some(DecommissionStatus::Init));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let cluster = Cluster::new();
    let client = cluster.client("zone_1-node0");

    let req = PutDecommissionRequest::new(test_util::ZONE, "zone_1")
        .with_timeout(Duration::from_secs(60));
    assert!(matches!(
        client.put_decommission(req).await,
        Err(client::Error::Api(ApiError::InvalidRequest(_)))
    ));

    let req = PutDecommissionRequest::new(test_util::ZONE, "zone_9");
    assert!(matches!(
        client.put_decommission(req).await,
        Err(client::Error::Api(ApiError::InvalidRequest(_)))
    ));

    let err = cluster.client("zone_9-node0").get_decommission().await.unwrap_err();
    assert!(matches!(err, client::Error::Transport(_)));

    assert_eq!(client.get_decommission().await.unwrap().status, None);
}
