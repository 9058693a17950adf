use {
    super::*,
    std::collections::BTreeSet,
};

pub const ZONE: &str = "zone";

/// Cluster-manager-eligible data node `{zone}-node{idx}` in the zone.
pub fn zoned_node(zone: &str, idx: usize) -> Node {
    Node::new(format!("{zone}-node{idx}"), Roles::CLUSTER_MANAGER | Roles::DATA)
        .with_attribute(ZONE, zone)
}

/// Cluster of `count` nodes per zone, every node voting. The lowest id node
/// is the manager.
pub fn zoned_cluster(zones: &[(&str, usize)]) -> ClusterState {
    cluster_of(
        zones
            .iter()
            .flat_map(|(zone, count)| (0..*count).map(move |idx| zoned_node(zone, idx))),
    )
}

pub fn cluster_of(nodes: impl IntoIterator<Item = Node>) -> ClusterState {
    let nodes = Nodes::new(nodes);
    let voters = nodes
        .cluster_manager_eligible()
        .map(|n| n.id().clone())
        .collect::<Vec<_>>();
    let nodes = match voters.first() {
        Some(id) => nodes.with_manager(id.clone()),
        None => nodes,
    };

    ClusterState::new(nodes, CoordinationMetadata::new(VotingConfiguration::new(voters)))
}

pub fn with_manager(state: &ClusterState, id: &str) -> ClusterState {
    let mut builder = state.to_builder();
    builder.nodes_mut().set_manager(Some(id.into()));
    builder.build()
}

pub fn with_nodes(state: &ClusterState, nodes: impl IntoIterator<Item = Node>) -> ClusterState {
    let mut builder = state.to_builder();
    for node in nodes {
        builder.nodes_mut().insert(node);
    }
    builder.build()
}

pub fn ids_in_zone(state: &ClusterState, zone: &str) -> BTreeSet<NodeId> {
    state
        .nodes()
        .with_attribute(ZONE, zone)
        .map(|n| n.id().clone())
        .collect()
}

/// Number of copies per state.
pub fn count(state: &ClusterState, shard_state: ShardState) -> usize {
    state.routing_table().copies_with_state(shard_state).count()
}
