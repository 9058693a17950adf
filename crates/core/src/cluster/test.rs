use {
    super::{metadata::Custom, *},
    crate::decommission::{DecommissionAttribute, DecommissionMetadata},
    serde::{Deserialize, Serialize},
    std::sync::Mutex,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct FromTheFuture(u32);

impl Custom for FromTheFuture {
    const TYPE: &'static str = "fromTheFuture";
    const MIN_SUPPORTED_VERSION: ProtocolVersion = ProtocolVersion::new(9, 0, 0);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Unregistered(String);

impl Custom for Unregistered {
    const TYPE: &'static str = "unregistered";
    const MIN_SUPPORTED_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);
}

fn decommission() -> DecommissionMetadata {
    DecommissionMetadata::new(DecommissionAttribute::new(test_util::ZONE, "zone_1"))
}

fn state_with_customs() -> ClusterState {
    test_util::zoned_cluster(&[("zone_1", 1), ("zone_2", 2)])
        .with_routing_table(RoutingTable::default().with_index("idx", 2, 1))
        .to_builder()
        .put_custom(decommission())
        .put_custom(FromTheFuture(42))
        .put_custom(Unregistered("x".into()))
        .build()
}

#[test]
fn snapshot_leaves_out_customs_unsupported_by_the_peer() {
    let state = state_with_customs();
    let registry = Registry::new()
        .register::<DecommissionMetadata>()
        .register::<FromTheFuture>()
        .register::<Unregistered>();

    let bytes = state
        .snapshot(ProtocolVersion::new(2, 2, 0))
        .unwrap()
        .encode()
        .unwrap();
    let restored = ClusterState::from_snapshot(Snapshot::decode(&bytes).unwrap(), &registry).unwrap();

    assert!(restored.metadata().custom::<DecommissionMetadata>().is_none());
    assert_eq!(restored.metadata().custom::<Unregistered>(), Some(&Unregistered("x".into())));
    assert_eq!(restored.nodes(), state.nodes());
    assert_eq!(restored.coordination(), state.coordination());
    assert_eq!(restored.routing_table(), state.routing_table());
    assert_eq!(restored.version(), state.version());
}

#[test]
fn restoring_skips_unknown_and_newer_customs() {
    let state = state_with_customs();
    let registry = Registry::new().register::<DecommissionMetadata>();

    let bytes = state
        .snapshot(ProtocolVersion::new(9, 9, 9))
        .unwrap()
        .encode()
        .unwrap();
    let restored = ClusterState::from_snapshot(Snapshot::decode(&bytes).unwrap(), &registry).unwrap();

    assert_eq!(restored.metadata().custom::<DecommissionMetadata>(), Some(&decommission()));
    assert!(restored.metadata().custom::<FromTheFuture>().is_none());
    assert!(restored.metadata().custom::<Unregistered>().is_none());
}

#[tokio::test]
async fn updates_are_applied_by_priority() {
    let updater = ClusterService::spawn(test_util::zoned_cluster(&[("zone_1", 1)]));
    let applied = std::sync::Arc::new(Mutex::new(Vec::new()));

    let submit = |name: &'static str, priority| {
        let applied = applied.clone();
        updater.submit(name, priority, move |_: &ClusterState| {
            applied.lock().unwrap().push(name);
            Ok::<_, ()>(None)
        })
    };

    // Queued before the writer gets to run.
    let updates = [
        submit("a", Priority::Normal),
        submit("b", Priority::Urgent),
        submit("c", Priority::Normal),
        submit("d", Priority::High),
        submit("e", Priority::Urgent),
    ];
    for update in futures::future::join_all(updates).await {
        update.unwrap();
    }

    assert_eq!(*applied.lock().unwrap(), ["b", "e", "d", "a", "c"]);
}

#[tokio::test]
async fn only_changes_get_published() {
    let updater = ClusterService::spawn(test_util::zoned_cluster(&[("zone_1", 2)]));
    let version = updater.state().version();

    let state = updater
        .submit("noop", Priority::Normal, |_: &ClusterState| Ok::<_, ()>(None))
        .await
        .unwrap();
    assert_eq!(state.version(), version);

    let err = updater
        .submit("rejected", Priority::Normal, |_: &ClusterState| {
            Err::<Option<ClusterState>, _>("rejected")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Task("rejected")));
    assert_eq!(updater.state().version(), version);

    let state = updater
        .submit("change", Priority::Normal, |state: &ClusterState| {
            Ok::<_, ()>(Some(state.to_builder().put_custom(decommission()).build()))
        })
        .await
        .unwrap();
    assert_eq!(state.version(), version + 1);
    assert_eq!(updater.state().version(), version + 1);
    assert_eq!(updater.view().state().metadata().custom::<DecommissionMetadata>(), Some(&decommission()));
}
