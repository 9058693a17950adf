//! Reroute: moves, assigns and starts shard copies in accordance with the
//! [`AwarenessDecider`].

use {
    crate::{
        awareness::{AttributeCatalog, AwarenessAttributes},
        cluster::{ClusterState, Node, Nodes, RoutingTable, ShardId, ShardState, UnassignedReason},
        placement::{self, AwarenessDecider, Decision},
        settings::Setting,
    },
    itertools::Itertools as _,
    std::sync::Arc,
};

#[derive(Clone, Debug)]
pub struct Allocator {
    catalog: AttributeCatalog,
    settings: Setting<placement::Settings>,
}

impl Allocator {
    pub fn new(catalog: AttributeCatalog, settings: Setting<placement::Settings>) -> Self {
        Self { catalog, settings }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &Setting<placement::Settings> {
        &self.settings
    }

    /// Moves copies that can't remain where they are and assigns unassigned
    /// ones. Returns `None` if nothing changed.
    pub fn reroute(&self, state: &ClusterState) -> Option<ClusterState> {
        let routing = self.reroute_table(state.nodes(), state.routing_table())?;
        Some(state.to_builder().routing_table(routing).build())
    }

    /// Completes every in-flight recovery and reroutes.
    pub fn start_initializing(&self, state: &ClusterState) -> Option<ClusterState> {
        let mut routing = state.routing_table().clone();
        let mut started = 0;

        for copies in routing.shards_mut() {
            for copy in copies.iter_mut() {
                if copy.start() {
                    started += 1;
                }
            }
        }

        if started == 0 {
            return self.reroute(state);
        }

        tracing::debug!(started, "started recovering shard copies");

        let routing = self
            .reroute_table(state.nodes(), &routing)
            .unwrap_or(routing);
        Some(state.to_builder().routing_table(routing).build())
    }

    /// Unassigns copies hosted on nodes that are no longer members of the
    /// cluster and reroutes. Returns `None` if nothing changed.
    pub fn disassociate_dead_nodes(&self, state: &ClusterState) -> Option<ClusterState> {
        let routing = self.disassociate_dead_nodes_table(state.nodes(), state.routing_table());
        let changed = routing.is_some();
        let routing = routing.unwrap_or_else(|| state.routing_table().clone());

        match self.reroute_table(state.nodes(), &routing) {
            Some(rerouted) => Some(state.to_builder().routing_table(rerouted).build()),
            None if changed => Some(state.to_builder().routing_table(routing).build()),
            None => None,
        }
    }

    pub(crate) fn disassociate_dead_nodes_table(
        &self,
        nodes: &Nodes,
        routing: &RoutingTable,
    ) -> Option<RoutingTable> {
        let mut new = routing.clone();
        let mut changed = false;

        for copies in new.shards_mut() {
            for copy in copies.iter_mut() {
                if copy.node().is_some_and(|id| !nodes.contains(id)) {
                    tracing::debug!(shard = %copy.shard_id(), copy = copy.copy_id(), "copy lost its node");
                    copy.unassign(UnassignedReason::NodeLeft);
                    changed = true;
                } else if copy.relocating_node().is_some_and(|id| !nodes.contains(id)) {
                    copy.cancel_relocation();
                    changed = true;
                }
            }

            let primary_lost = copies.iter().any(|c| c.primary() && c.is_unassigned());
            if !primary_lost {
                continue;
            }

            let Some(candidate) = copies
                .iter()
                .position(|c| !c.primary() && c.is_active())
            else {
                continue;
            };

            for copy in copies.iter_mut() {
                if copy.primary() && copy.is_unassigned() {
                    copy.set_primary(false);
                }
            }
            copies[candidate].set_primary(true);
            tracing::debug!(shard = %copies[candidate].shard_id(), "replica promoted to primary");
        }

        changed.then_some(new)
    }

    pub(crate) fn reroute_table(&self, nodes: &Nodes, routing: &RoutingTable) -> Option<RoutingTable> {
        let attributes = self.catalog.snapshot();
        let settings = self.settings.get();

        let mut ctx = Reroute {
            nodes,
            attributes: &attributes,
            settings: &settings,
            routing: routing.clone(),
            changed: false,
        };

        ctx.move_shards();
        ctx.allocate_unassigned(true);
        ctx.allocate_unassigned(false);

        ctx.changed.then_some(ctx.routing)
    }
}

struct Reroute<'a> {
    nodes: &'a Nodes,
    attributes: &'a Arc<AwarenessAttributes>,
    settings: &'a Arc<placement::Settings>,
    routing: RoutingTable,
    changed: bool,
}

impl Reroute<'_> {
    fn decider(&self) -> AwarenessDecider<'_> {
        AwarenessDecider::new(self.nodes, &self.routing, self.attributes, self.settings)
    }

    /// Data nodes ordered by the number of copies they host.
    fn candidates(&self) -> Vec<&Node> {
        self.nodes
            .data_nodes()
            .sorted_by_key(|n| (self.routing.node_load(n.id()), n.id().clone()))
            .collect()
    }

    fn shard_ids(&self) -> Vec<ShardId> {
        self.routing.shard_ids().cloned().collect()
    }

    fn move_shards(&mut self) {
        for shard_id in self.shard_ids() {
            let copies = self.routing.copies(&shard_id).to_vec();

            for copy in copies.iter().filter(|c| c.state() == ShardState::Started) {
                let Some(node) = copy.node().and_then(|id| self.nodes.get(id)) else {
                    continue;
                };

                let decider = self.decider();
                if decider.can_remain(copy, node) != Decision::No {
                    continue;
                }

                let target = self
                    .candidates()
                    .into_iter()
                    .find(|n| decider.can_allocate(copy, n) == Decision::Yes)
                    .map(|n| n.id().clone());

                if let Some(target) = target {
                    tracing::debug!(shard = %shard_id, from = %node.id(), to = %target, "relocating shard copy");

                    if let Some(c) = self.routing.copy_mut(&shard_id, copy.copy_id()) {
                        c.relocate(target);
                        self.changed = true;
                    }
                }
            }
        }
    }

    fn allocate_unassigned(&mut self, primaries: bool) {
        for shard_id in self.shard_ids() {
            if !primaries && !self.routing.primary_active(&shard_id) {
                continue;
            }

            let unassigned: Vec<_> = self
                .routing
                .copies(&shard_id)
                .iter()
                .filter(|c| c.is_unassigned() && c.primary() == primaries)
                .cloned()
                .collect();

            for copy in unassigned {
                let decider = self.decider();
                let target = self
                    .candidates()
                    .into_iter()
                    .find(|n| decider.can_allocate(&copy, n) == Decision::Yes)
                    .map(|n| n.id().clone());

                let Some(target) = target else {
                    tracing::trace!(shard = %shard_id, copy = copy.copy_id(), "copy stays unassigned");
                    continue;
                };

                tracing::debug!(shard = %shard_id, copy = copy.copy_id(), node = %target, "allocating shard copy");

                if let Some(c) = self.routing.copy_mut(&shard_id, copy.copy_id()) {
                    c.initialize(target);
                    self.changed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::cluster::{test_util, NodeId},
        itertools::Itertools as _,
        rstest::rstest,
    };

    fn allocator(attributes: AwarenessAttributes, settings: placement::Settings) -> Allocator {
        Allocator::new(AttributeCatalog::new(attributes), Setting::new(settings))
    }

    fn zones() -> AwarenessAttributes {
        AwarenessAttributes::new([test_util::ZONE])
    }

    fn copies_in_zone(state: &ClusterState, zone: &str) -> usize {
        let ids = test_util::ids_in_zone(state, zone);
        state
            .routing_table()
            .all_copies()
            .filter(|c| c.effective_node().is_some_and(|id| ids.contains(id)))
            .count()
    }

    fn start_all(allocator: &Allocator, mut state: ClusterState) -> ClusterState {
        while let Some(next) = allocator.start_initializing(&state) {
            state = next;
        }
        state
    }

    #[test]
    fn new_zone_attracts_a_single_copy() {
        let allocator = allocator(zones(), placement::Settings::default());
        let state = test_util::zoned_cluster(&[("1", 2)])
            .with_routing_table(RoutingTable::default().with_index("idx", 1, 1));

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 2);
        assert_eq!(copies_in_zone(&state, "1"), 2);

        let state = test_util::with_nodes(&state, [test_util::zoned_node("2", 0)]);
        let state = allocator.reroute(&state).unwrap();
        let relocating: Vec<_> = state
            .routing_table()
            .copies_with_state(ShardState::Relocating)
            .collect();
        assert_eq!(relocating.len(), 1);
        assert_eq!(relocating[0].relocating_node(), Some(&NodeId::from("2-node0")));

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 2);
        assert_eq!(copies_in_zone(&state, "1"), 1);
        assert_eq!(copies_in_zone(&state, "2"), 1);

        let state = test_util::with_nodes(&state, [test_util::zoned_node("3", 0)]);
        assert!(allocator.reroute(&state).is_none());
    }

    #[test]
    fn replica_waits_for_a_forced_value() {
        let attributes = zones().with_forced_values(test_util::ZONE, ["a", "b"]);
        let allocator = allocator(attributes, placement::Settings::default());
        let state = test_util::zoned_cluster(&[("a", 2)])
            .with_routing_table(RoutingTable::default().with_index("idx", 1, 1));

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 1);
        assert_eq!(test_util::count(&state, ShardState::Unassigned), 1);

        let state = test_util::with_nodes(&state, [test_util::zoned_node("b", 0)]);
        let state = allocator.reroute(&state).unwrap();
        assert_eq!(test_util::count(&state, ShardState::Initializing), 1);
        assert_eq!(copies_in_zone(&state, "b"), 1);

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 2);
        assert_eq!(test_util::count(&state, ShardState::Unassigned), 0);
    }

    #[test]
    fn copies_spread_across_every_zone() {
        let allocator = allocator(zones(), placement::Settings::default());
        let state = test_util::zoned_cluster(&[("zone_1", 3), ("zone_2", 3), ("zone_3", 3)])
            .with_routing_table(RoutingTable::default().with_index("idx", 4, 2));

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 12);

        for shard_id in state.routing_table().shard_ids() {
            let zones: Vec<_> = state
                .routing_table()
                .copies(shard_id)
                .iter()
                .filter_map(|c| c.node().and_then(|id| state.nodes().get(id)))
                .filter_map(|n| n.attribute(test_util::ZONE))
                .sorted()
                .collect();
            assert_eq!(zones, ["zone_1", "zone_2", "zone_3"], "{shard_id}");
        }
    }

    #[rstest]
    #[case::unbounded(None, false, 4, (3, 1))]
    #[case::bounded(Some(0), false, 4, (2, 2))]
    #[case::bounded_rounds_the_share_up(Some(0), false, 5, (3, 2))]
    #[case::bypassed(Some(0), true, 4, (3, 1))]
    fn skewness_limit_is_applied(
        #[case] skewness_limit: Option<usize>,
        #[case] forced_allocation_disable: bool,
        #[case] shards: u32,
        #[case] expected: (usize, usize),
    ) {
        let allocator = allocator(zones(), placement::Settings {
            skewness_limit,
            forced_allocation_disable,
            ..Default::default()
        });
        let state = test_util::zoned_cluster(&[("a", 2), ("b", 1)])
            .with_routing_table(RoutingTable::default().with_index("idx", shards, 0));

        let state = allocator.reroute(&state).unwrap();
        assert_eq!(test_util::count(&state, ShardState::Initializing), shards as usize);
        assert_eq!((copies_in_zone(&state, "a"), copies_in_zone(&state, "b")), expected);
    }

    #[test]
    fn recoveries_are_throttled() {
        let allocator = allocator(AwarenessAttributes::default(), placement::Settings::default());
        let state = test_util::zoned_cluster(&[("a", 1)])
            .with_routing_table(RoutingTable::default().with_index("idx", 3, 0));

        let state = allocator.reroute(&state).unwrap();
        assert_eq!(test_util::count(&state, ShardState::Initializing), 2);
        assert_eq!(test_util::count(&state, ShardState::Unassigned), 1);

        let state = start_all(&allocator, state);
        assert_eq!(test_util::count(&state, ShardState::Started), 3);
    }

    #[test]
    fn lost_primary_gets_replaced_by_a_replica() {
        let allocator = allocator(zones(), placement::Settings::default());
        let state = test_util::zoned_cluster(&[("zone_1", 1), ("zone_2", 1)])
            .with_routing_table(RoutingTable::default().with_index("idx", 1, 1));
        let state = start_all(&allocator, state);

        let primary_node = state
            .routing_table()
            .all_copies()
            .find(|c| c.primary())
            .and_then(|c| c.node().cloned())
            .unwrap();

        let mut builder = state.to_builder();
        builder.nodes_mut().remove(&primary_node);
        let state = allocator.disassociate_dead_nodes(&builder.build()).unwrap();

        let copies = state.routing_table().all_copies().collect::<Vec<_>>();
        let primary = copies.iter().find(|c| c.primary()).unwrap();
        assert!(primary.is_active());
        assert_ne!(primary.node(), Some(&primary_node));
        // Nowhere to place the replica on a single node.
        assert_eq!(copies.iter().filter(|c| c.is_unassigned()).count(), 1);
        assert_eq!(
            copies.iter().find(|c| c.is_unassigned()).and_then(|c| c.unassigned_reason()),
            Some(UnassignedReason::NodeLeft)
        );
    }
}
