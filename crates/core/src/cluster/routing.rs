use {
    super::NodeId,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt},
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    pub index: String,
    pub shard: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

/// Identifier of a copy within its shard. Survives primary promotion.
pub type CopyId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    Unassigned,
    Initializing,
    Started,

    /// Started on the source node and initializing on the target one.
    Relocating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnassignedReason {
    IndexCreated,
    NodeLeft,
}

/// Placement of a single shard copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    shard_id: ShardId,
    copy_id: CopyId,
    primary: bool,
    state: ShardState,
    node: Option<NodeId>,
    relocating_node: Option<NodeId>,
    unassigned_reason: Option<UnassignedReason>,
}

impl ShardRouting {
    pub fn unassigned(
        shard_id: ShardId,
        copy_id: CopyId,
        primary: bool,
        reason: UnassignedReason,
    ) -> Self {
        Self {
            shard_id,
            copy_id,
            primary,
            state: ShardState::Unassigned,
            node: None,
            relocating_node: None,
            unassigned_reason: Some(reason),
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn copy_id(&self) -> CopyId {
        self.copy_id
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    /// Node currently hosting the copy. The source node for relocations.
    pub fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    pub fn relocating_node(&self) -> Option<&NodeId> {
        self.relocating_node.as_ref()
    }

    pub fn unassigned_reason(&self) -> Option<UnassignedReason> {
        self.unassigned_reason
    }

    /// Node the copy ends up on once all in-flight moves complete.
    pub fn effective_node(&self) -> Option<&NodeId> {
        match self.state {
            ShardState::Relocating => self.relocating_node.as_ref(),
            _ => self.node.as_ref(),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.state == ShardState::Unassigned
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ShardState::Started | ShardState::Relocating)
    }

    /// Whether the copy occupies the node, either as the host or as the
    /// relocation target.
    pub fn occupies(&self, id: &NodeId) -> bool {
        self.node.as_ref() == Some(id) || self.relocating_node.as_ref() == Some(id)
    }

    /// Whether the copy is currently being recovered onto the node.
    pub fn is_recovering_on(&self, id: &NodeId) -> bool {
        match self.state {
            ShardState::Initializing => self.node.as_ref() == Some(id),
            ShardState::Relocating => self.relocating_node.as_ref() == Some(id),
            ShardState::Unassigned | ShardState::Started => false,
        }
    }

    pub(crate) fn initialize(&mut self, node: NodeId) {
        self.state = ShardState::Initializing;
        self.node = Some(node);
        self.unassigned_reason = None;
    }

    pub(crate) fn relocate(&mut self, target: NodeId) {
        self.state = ShardState::Relocating;
        self.relocating_node = Some(target);
    }

    /// Completes recovery: initializing copies start, relocating ones land
    /// on their target.
    pub(crate) fn start(&mut self) -> bool {
        match self.state {
            ShardState::Initializing => {
                self.state = ShardState::Started;
                true
            }
            ShardState::Relocating => {
                self.state = ShardState::Started;
                self.node = self.relocating_node.take();
                true
            }
            ShardState::Unassigned | ShardState::Started => false,
        }
    }

    pub(crate) fn cancel_relocation(&mut self) {
        if self.state == ShardState::Relocating {
            self.state = ShardState::Started;
            self.relocating_node = None;
        }
    }

    pub(crate) fn unassign(&mut self, reason: UnassignedReason) {
        self.state = ShardState::Unassigned;
        self.node = None;
        self.relocating_node = None;
        self.unassigned_reason = Some(reason);
    }

    pub(crate) fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }
}

/// Placement of every shard copy in the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    shards: BTreeMap<ShardId, Vec<ShardRouting>>,
}

impl RoutingTable {
    /// Adds an index of `shards` shards with `replicas` replicas each, all
    /// copies unassigned.
    pub fn with_index(mut self, index: &str, shards: u32, replicas: u32) -> Self {
        for shard in 0..shards {
            let id = ShardId::new(index, shard);
            let copies = (0..=replicas)
                .map(|copy| {
                    ShardRouting::unassigned(
                        id.clone(),
                        copy,
                        copy == 0,
                        UnassignedReason::IndexCreated,
                    )
                })
                .collect();
            self.shards.insert(id, copies);
        }
        self
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &ShardId> {
        self.shards.keys()
    }

    /// Copies of the shard, primary first at creation time.
    pub fn copies(&self, id: &ShardId) -> &[ShardRouting] {
        self.shards.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn all_copies(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values().flatten()
    }

    pub fn copies_with_state(&self, state: ShardState) -> impl Iterator<Item = &ShardRouting> {
        self.all_copies().filter(move |c| c.state == state)
    }

    pub fn primary_active(&self, id: &ShardId) -> bool {
        self.copies(id).iter().any(|c| c.primary && c.is_active())
    }

    /// Number of copies that are or will be hosted by the node.
    pub fn node_load(&self, id: &NodeId) -> usize {
        self.all_copies()
            .filter(|c| c.effective_node() == Some(id))
            .count()
    }

    pub(crate) fn copy_mut(&mut self, id: &ShardId, copy: CopyId) -> Option<&mut ShardRouting> {
        self.shards
            .get_mut(id)
            .and_then(|copies| copies.iter_mut().find(|c| c.copy_id == copy))
    }

    pub(crate) fn shards_mut(&mut self) -> impl Iterator<Item = &mut Vec<ShardRouting>> {
        self.shards.values_mut()
    }
}
