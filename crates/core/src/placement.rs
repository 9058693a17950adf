//! Awareness-based shard placement decisions.

use {
    crate::{
        awareness::AwarenessAttributes,
        cluster::{Node, NodeId, Nodes, RoutingTable, ShardRouting},
    },
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
};

/// Outcome of a placement check, ordered by restrictiveness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Decision {
    Yes,
    Throttle,
    No,
}

impl Decision {
    /// Combines two decisions, keeping the most restrictive one.
    pub fn and(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Placement knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// How many copies above the even share a single attribute value may
    /// hold cluster-wide. `None` disables the check.
    ///
    /// Allocating a copy onto a value is rejected when
    /// `copies_after > ceil(total_after / values) + skewness_limit`, where
    /// `copies_after` is the number of copies on the value including the new
    /// one, `total_after` is the number of copies on all the values including
    /// the new one, and `values` is the number of attribute values. A limit
    /// of `0` still allows every value to reach the rounded up share.
    pub skewness_limit: Option<usize>,

    /// Bypasses the skewness check.
    pub forced_allocation_disable: bool,

    /// Maximum number of copies recovering onto a single node.
    pub node_concurrent_recoveries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skewness_limit: None,
            forced_allocation_disable: false,
            node_concurrent_recoveries: 2,
        }
    }
}

/// Read-only context of a placement decision: a single snapshot of the
/// cluster, the awareness attributes and the [`Settings`].
#[derive(Clone, Copy, Debug)]
pub struct AwarenessDecider<'a> {
    nodes: &'a Nodes,
    routing: &'a RoutingTable,
    attributes: &'a AwarenessAttributes,
    settings: &'a Settings,
}

impl<'a> AwarenessDecider<'a> {
    pub fn new(
        nodes: &'a Nodes,
        routing: &'a RoutingTable,
        attributes: &'a AwarenessAttributes,
        settings: &'a Settings,
    ) -> Self {
        Self {
            nodes,
            routing,
            attributes,
            settings,
        }
    }

    /// Decides whether `copy` may be allocated (or relocated) to `node`.
    pub fn can_allocate(&self, copy: &ShardRouting, node: &Node) -> Decision {
        self.same_shard(copy, node)
            .and(self.throttle(node))
            .and(self.awareness(copy, node))
    }

    /// Decides whether `copy` may stay on `node`.
    pub fn can_remain(&self, copy: &ShardRouting, node: &Node) -> Decision {
        self.awareness(copy, node)
    }

    fn same_shard(&self, copy: &ShardRouting, node: &Node) -> Decision {
        let occupied = self
            .routing
            .copies(copy.shard_id())
            .iter()
            .filter(|c| c.copy_id() != copy.copy_id())
            .any(|c| c.occupies(node.id()));

        if occupied {
            Decision::No
        } else {
            Decision::Yes
        }
    }

    fn throttle(&self, node: &Node) -> Decision {
        let recovering = self
            .routing
            .all_copies()
            .filter(|c| c.is_recovering_on(node.id()))
            .count();

        if recovering >= self.settings.node_concurrent_recoveries {
            Decision::Throttle
        } else {
            Decision::Yes
        }
    }

    fn awareness(&self, copy: &ShardRouting, node: &Node) -> Decision {
        self.attributes
            .names()
            .iter()
            .map(|name| self.attribute_awareness(name, copy, node))
            .fold(Decision::Yes, Decision::and)
    }

    fn attribute_awareness(&self, name: &str, copy: &ShardRouting, node: &Node) -> Decision {
        let Some(value) = node.attribute(name) else {
            tracing::trace!(node = %node.id(), attribute = name, "node lacks awareness attribute");
            return Decision::No;
        };

        let values = self.value_set(name, value);
        if !values.contains(value) {
            return Decision::No;
        }

        let copies = self.routing.copies(copy.shard_id());
        let shard_counts = self.count_by_value(name, copies.iter(), copy);
        let total_copies = copies.len();
        let cap = total_copies.div_ceil(values.len());

        let count = shard_counts.get(value).copied().unwrap_or(0);
        let other_below_cap = values
            .iter()
            .filter(|v| **v != value)
            .any(|v| shard_counts.get(*v).copied().unwrap_or(0) < cap);

        if count >= cap && other_below_cap {
            tracing::trace!(
                shard = %copy.shard_id(),
                node = %node.id(),
                attribute = name,
                value,
                count,
                cap,
                "too many copies of the shard on the attribute value"
            );
            return Decision::No;
        }

        if let Some(limit) = self.skewness_limit() {
            let counts = self.count_by_value(name, self.routing.all_copies(), copy);
            let after = counts.get(value).copied().unwrap_or(0) + 1;
            let total_after = values
                .iter()
                .map(|v| counts.get(*v).copied().unwrap_or(0))
                .sum::<usize>()
                + 1;
            let even_share = total_after.div_ceil(values.len());

            if after > even_share + limit {
                tracing::trace!(
                    node = %node.id(),
                    attribute = name,
                    value,
                    after,
                    even_share,
                    limit,
                    "attribute value skewness limit reached"
                );
                return Decision::No;
            }
        }

        Decision::Yes
    }

    fn skewness_limit(&self) -> Option<usize> {
        if self.settings.forced_allocation_disable {
            return None;
        }

        self.settings.skewness_limit
    }

    /// Values the copies are expected to be spread across: the forced
    /// values if the attribute is forced, otherwise the values observed on
    /// the data nodes of the cluster.
    fn value_set<'v>(&self, name: &str, candidate: &'v str) -> BTreeSet<&'v str>
    where
        'a: 'v,
    {
        if let Some(forced) = self.attributes.forced_values(name) {
            return forced.iter().map(String::as_str).collect();
        }

        self.nodes
            .data_nodes()
            .filter_map(|n| n.attribute(name))
            .chain([candidate])
            .collect()
    }

    /// Counts copies per attribute value, placing relocating copies on
    /// their target and ignoring `excluded`.
    fn count_by_value<'c>(
        &self,
        name: &str,
        copies: impl Iterator<Item = &'c ShardRouting>,
        excluded: &ShardRouting,
    ) -> BTreeMap<&'a str, usize> {
        let mut counts = BTreeMap::new();

        for c in copies {
            if c.shard_id() == excluded.shard_id() && c.copy_id() == excluded.copy_id() {
                continue;
            }

            let value = c
                .effective_node()
                .and_then(|id| self.node_attribute(id, name));

            if let Some(value) = value {
                *counts.entry(value).or_insert(0) += 1;
            }
        }

        counts
    }

    fn node_attribute(&self, id: &NodeId, name: &str) -> Option<&'a str> {
        self.nodes.get(id).and_then(|n| n.attribute(name))
    }
}
