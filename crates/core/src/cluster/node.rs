use {
    derive_more::{Display, From},
    serde::{Deserialize, Serialize},
    std::collections::{btree_map, BTreeMap},
};

/// Unique identifier of a cluster [`Node`].
#[derive(
    Clone, Debug, Display, From, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(String);

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

bitflags::bitflags! {
    /// Roles a [`Node`] plays in the cluster.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Roles: u8 {
        /// Can be elected as the cluster manager and votes in elections.
        const CLUSTER_MANAGER = 0b01;

        /// Hosts shard copies.
        const DATA = 0b10;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    roles: Roles,
    attributes: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, roles: Roles) -> Self {
        Self {
            id: id.into(),
            roles,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    /// Returns the value of the `name` attribute of this [`Node`].
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn is_cluster_manager_eligible(&self) -> bool {
        self.roles.contains(Roles::CLUSTER_MANAGER)
    }

    pub fn is_data(&self) -> bool {
        self.roles.contains(Roles::DATA)
    }
}

/// Cluster members and the elected manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nodes {
    nodes: BTreeMap<NodeId, Node>,
    manager_id: Option<NodeId>,
}

impl Nodes {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            manager_id: None,
        }
    }

    pub fn with_manager(mut self, id: impl Into<NodeId>) -> Self {
        self.manager_id = Some(id.into());
        self
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, NodeId, Node> {
        self.nodes.values()
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_data())
    }

    pub fn cluster_manager_eligible(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_cluster_manager_eligible())
    }

    /// Nodes having the `name` attribute set to `value`.
    pub fn with_attribute<'a>(
        &'a self,
        name: &'a str,
        value: &'a str,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.attribute(name) == Some(value))
    }

    pub fn manager_id(&self) -> Option<&NodeId> {
        self.manager_id.as_ref()
    }

    pub fn manager(&self) -> Option<&Node> {
        self.manager_id.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn is_manager(&self, id: &NodeId) -> bool {
        self.manager_id.as_ref() == Some(id)
    }

    pub(crate) fn insert(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub(crate) fn remove(&mut self, id: &NodeId) -> Option<Node> {
        if self.manager_id.as_ref() == Some(id) {
            self.manager_id = None;
        }
        self.nodes.remove(id)
    }

    pub(crate) fn set_manager(&mut self, id: Option<NodeId>) {
        self.manager_id = id;
    }
}

impl<'a> IntoIterator for &'a Nodes {
    type Item = &'a Node;
    type IntoIter = btree_map::Values<'a, NodeId, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
