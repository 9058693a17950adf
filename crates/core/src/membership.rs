//! Cluster membership changes: node joins and forced removals.

use {
    crate::{
        allocation::Allocator,
        cluster::{ClusterState, Node, NodeId, Priority, StateUpdater, UpdateError},
    },
    std::{
        collections::BTreeSet,
        error::Error as StdError,
        future::Future,
        sync::Arc,
        time::Duration,
    },
};

/// Membership functionality the decommission workflow depends on.
pub trait Membership: Clone + Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    /// Removes the nodes from the cluster, rerouting the copies they host.
    fn remove_nodes(
        &self,
        ids: BTreeSet<NodeId>,
        reason: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Removing {0:?} would leave the voting configuration without a quorum")]
    QuorumLoss(BTreeSet<NodeId>),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cluster state writer is closed")]
    Closed,
}

impl From<UpdateError<Error>> for Error {
    fn from(err: UpdateError<Error>) -> Self {
        match err {
            UpdateError::Task(err) => err,
            UpdateError::Closed => Self::Closed,
        }
    }
}

/// [`Membership`] over the local [`StateUpdater`].
#[derive(Clone, Debug)]
pub struct LocalMembership<S> {
    updater: S,
    allocator: Allocator,
}

impl<S: StateUpdater> LocalMembership<S> {
    pub fn new(updater: S, allocator: Allocator) -> Self {
        Self { updater, allocator }
    }

    /// Adds (or updates) the nodes and reroutes.
    pub async fn join(&self, nodes: Vec<Node>) -> Result<Arc<ClusterState>, Error> {
        let allocator = self.allocator.clone();

        let state = self
            .updater
            .submit("node-join", Priority::High, move |state: &ClusterState| {
                let mut builder = state.to_builder();
                for node in nodes {
                    tracing::info!(id = %node.id(), "node joined");
                    builder.nodes_mut().insert(node);
                }

                let routing = allocator
                    .reroute_table(builder.nodes(), builder.routing())
                    .unwrap_or_else(|| builder.routing().clone());
                Ok::<_, Error>(Some(builder.routing_table(routing).build()))
            })
            .await?;

        Ok(state)
    }
}

impl<S: StateUpdater> Membership for LocalMembership<S> {
    type Error = Error;

    fn remove_nodes(
        &self,
        ids: BTreeSet<NodeId>,
        reason: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        let allocator = self.allocator.clone();
        let reason = reason.to_string();

        let update = self.updater.submit(
            "node-left",
            Priority::Urgent,
            move |state: &ClusterState| remove(state, &ids, &reason, &allocator),
        );

        async move {
            tokio::time::timeout(timeout, update)
                .await
                .map_err(|_| Error::Timeout(timeout))??;
            Ok(())
        }
    }
}

fn remove(
    state: &ClusterState,
    ids: &BTreeSet<NodeId>,
    reason: &str,
    allocator: &Allocator,
) -> Result<Option<ClusterState>, Error> {
    let present: BTreeSet<&NodeId> = ids.iter().filter(|id| state.nodes().contains(id)).collect();
    if present.is_empty() {
        return Ok(None);
    }

    let config = state.coordination().last_committed_config();
    let remaining = config.iter().filter(|id| !present.contains(id));
    if config.contains_any(present.iter().copied()) && !config.has_quorum(remaining) {
        return Err(Error::QuorumLoss(ids.clone()));
    }

    let mut builder = state.to_builder();
    for id in &present {
        tracing::info!(%id, reason, "removing node");
        builder.nodes_mut().remove(id);
    }

    let new_config = config.without(present.iter().copied());
    if builder.nodes().manager_id().is_none() {
        let manager = new_config
            .iter()
            .find(|id| {
                builder
                    .nodes()
                    .get(id)
                    .is_some_and(|n| n.is_cluster_manager_eligible())
            })
            .cloned();
        tracing::info!(?manager, "cluster manager left, electing a new one");
        builder.nodes_mut().set_manager(manager);
    }
    builder.coordination_mut().set_last_committed_config(new_config);

    let routing = allocator
        .disassociate_dead_nodes_table(builder.nodes(), builder.routing())
        .unwrap_or_else(|| builder.routing().clone());
    let routing = allocator
        .reroute_table(builder.nodes(), &routing)
        .unwrap_or(routing);

    Ok(Some(builder.routing_table(routing).build()))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            awareness::{AttributeCatalog, AwarenessAttributes},
            cluster::{test_util, ClusterService, RoutingTable, ShardState},
            settings::Setting,
        },
    };

    fn allocator() -> Allocator {
        let catalog = AttributeCatalog::new(AwarenessAttributes::new([test_util::ZONE]));
        Allocator::new(catalog, Setting::default())
    }

    #[tokio::test]
    async fn removed_copies_get_reallocated() {
        let allocator = allocator();
        let state = test_util::zoned_cluster(&[("zone_1", 1), ("zone_2", 1), ("zone_3", 1)])
            .with_routing_table(RoutingTable::default().with_index("idx", 1, 1));
        let state = allocator.reroute(&state).unwrap();
        // Primary first, then the replica.
        let state = allocator.start_initializing(&state).unwrap();
        let state = allocator.start_initializing(&state).unwrap();
        assert_eq!(test_util::count(&state, ShardState::Started), 2);

        let updater = ClusterService::spawn(state);
        let membership = LocalMembership::new(updater.clone(), allocator);

        let ids = test_util::ids_in_zone(&updater.state(), "zone_1");
        membership
            .remove_nodes(ids.clone(), "test", Duration::from_secs(1))
            .await
            .unwrap();

        let state = updater.state();
        assert_eq!(state.nodes().len(), 2);
        assert!(!state.coordination().last_committed_config().contains_any(&ids));
        // The lost primary is replaced by the promoted replica and a new
        // replica is initializing.
        assert_eq!(test_util::count(&state, ShardState::Started), 1);
        assert_eq!(test_util::count(&state, ShardState::Initializing), 1);
        assert!(state
            .routing_table()
            .all_copies()
            .filter(|c| c.primary())
            .all(|c| c.is_active()));
    }

    #[tokio::test]
    async fn quorum_loss_is_rejected() {
        let state = test_util::zoned_cluster(&[("zone_1", 2), ("zone_2", 1)]);
        let updater = ClusterService::spawn(state);
        let membership = LocalMembership::new(updater.clone(), allocator());

        let ids = test_util::ids_in_zone(&updater.state(), "zone_1");
        let err = membership
            .remove_nodes(ids.clone(), "test", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err, Error::QuorumLoss(ids));
        assert_eq!(updater.state().nodes().len(), 3);
    }
}
