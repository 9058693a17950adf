use self::metadata::Custom;
pub use {
    metadata::{Metadata, ProtocolVersion, Registry},
    node::{Node, NodeId, Nodes, Roles},
    routing::{RoutingTable, ShardId, ShardRouting, ShardState, UnassignedReason},
    service::{ClusterService, Priority, StateUpdater, UpdateError},
    snapshot::Snapshot,
    view::View,
    voting::{CoordinationMetadata, VotingConfiguration},
};

pub mod metadata;
pub mod node;
pub mod routing;
pub mod service;
pub mod snapshot;
pub mod view;
pub mod voting;

#[cfg(test)]
mod test;
#[cfg(any(test, feature = "testing"))]
pub mod test_util;

/// Monotonically increasing version of the [`ClusterState`].
pub type Version = u64;

/// Immutable snapshot of the cluster.
///
/// Every transition produces a new [`ClusterState`] through a [`Builder`],
/// bumping the [`Version`] by one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterState {
    version: Version,
    nodes: Nodes,
    coordination: CoordinationMetadata,
    routing_table: RoutingTable,
    metadata: Metadata,
}

impl ClusterState {
    pub fn new(nodes: Nodes, coordination: CoordinationMetadata) -> Self {
        Self {
            version: 0,
            nodes,
            coordination,
            routing_table: RoutingTable::default(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.routing_table = routing_table;
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    pub fn coordination(&self) -> &CoordinationMetadata {
        &self.coordination
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Starts building the next version of this [`ClusterState`].
    pub fn to_builder(&self) -> Builder {
        Builder {
            inner: self.clone(),
        }
    }
}

/// Builder of the next [`ClusterState`] version.
#[derive(Debug)]
pub struct Builder {
    inner: ClusterState,
}

impl Builder {
    pub fn nodes(&self) -> &Nodes {
        &self.inner.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut Nodes {
        &mut self.inner.nodes
    }

    pub fn coordination_mut(&mut self) -> &mut CoordinationMetadata {
        &mut self.inner.coordination
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.inner.routing_table
    }

    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.inner.routing_table = routing_table;
        self
    }

    pub fn put_custom<T: Custom>(mut self, value: T) -> Self {
        self.inner.metadata.put_custom(value);
        self
    }

    pub fn remove_custom<T: Custom>(mut self) -> Self {
        self.inner.metadata.remove_custom::<T>();
        self
    }

    pub fn build(mut self) -> ClusterState {
        self.inner.version += 1;
        self.inner
    }
}
