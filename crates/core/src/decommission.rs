//! Awareness attribute decommissioning: evicts every node sharing an
//! attribute value (e.g. a whole zone) without losing the voting quorum.

use {
    crate::{
        awareness::AwarenessAttributes,
        cluster::{Node, NodeId},
    },
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};
pub use {
    controller::Controller,
    metadata::DecommissionMetadata,
    service::{Config, Service},
};

pub mod controller;
pub mod metadata;
pub mod service;
mod workflow;


/// Reason recorded for the removal of decommissioned nodes.
pub const NODES_DECOMMISSIONED_REASON: &str = "nodes-decommissioned";

/// Awareness attribute `name` + `value` pair selecting the nodes to evict.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecommissionAttribute {
    name: String,
    value: String,
}

impl DecommissionAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether both attributes refer to the same awareness attribute,
    /// regardless of the value.
    pub fn same_name(&self, other: &Self) -> bool {
        self.name == other.name
    }

    /// Whether the node carries this attribute value.
    pub fn matches(&self, node: &Node) -> bool {
        node.attribute(&self.name) == Some(self.value.as_str())
    }

    /// Validates this attribute against the configured
    /// [`AwarenessAttributes`].
    ///
    /// Decommissioning requires the attribute to be forced and the value to
    /// be one of the forced values.
    pub fn validate(&self, attributes: &AwarenessAttributes) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        if self.value.is_empty() {
            return Err(ValidationError::MissingValue);
        }

        if attributes.is_empty() {
            return Err(ValidationError::AwarenessNotConfigured);
        }

        if !attributes.is_configured(&self.name) {
            return Err(ValidationError::UnknownAttribute(self.name.clone()));
        }

        let forced = attributes
            .forced_values(&self.name)
            .ok_or_else(|| ValidationError::NotForced(self.name.clone()))?;

        if !forced.iter().any(|v| v == &self.value) {
            return Err(ValidationError::ValueNotForced(self.clone()));
        }

        Ok(())
    }
}

impl fmt::Display for DecommissionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// Status of a decommission.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecommissionStatus {
    /// Registered, nodes are being excluded from the voting configuration.
    Init,

    /// Nodes are being removed from the cluster.
    InProgress,

    /// Nodes have been removed.
    Successful,

    /// The decommission failed. Can be re-requested.
    Failed,
}

impl DecommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InProgress => "in_progress",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }

    /// Validates the transition from this status to `to`.
    pub fn require_transition(self, to: Self) -> Result<(), InvalidTransitionError> {
        use DecommissionStatus::*;

        match (self, to) {
            (Init, InProgress | Failed) | (InProgress, Successful | Failed) => Ok(()),
            (from, to) => Err(InvalidTransitionError { from, to }),
        }
    }
}

impl fmt::Display for DecommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecommissionStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "init" => Self::Init,
            "in_progress" => Self::InProgress,
            "successful" => Self::Successful,
            "failed" => Self::Failed,
            _ => return Err(UnknownStatusError(s.to_string())),
        })
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown decommission status: {0}")]
pub struct UnknownStatusError(pub String);

#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid decommission status transition: {from} -> {to}")]
pub struct InvalidTransitionError {
    pub from: DecommissionStatus,
    pub to: DecommissionStatus,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Attribute name is missing")]
    MissingName,

    #[error("Attribute value is missing")]
    MissingValue,

    #[error("Awareness attributes are not configured")]
    AwarenessNotConfigured,

    #[error("Invalid awareness attribute requested for decommissioning: {0}")]
    UnknownAttribute(String),

    #[error("Forced awareness attribute {0} isn't configured")]
    NotForced(String),

    #[error("Invalid awareness attribute value requested for decommissioning: {0}")]
    ValueNotForced(DecommissionAttribute),
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("{0} is already successfully decommissioned, recommission before triggering another decommission")]
    AlreadyDecommissioned(DecommissionAttribute),

    #[error("There's an in-flight decommission of {0}")]
    InFlight(DecommissionAttribute),

    #[error("Another decommission request is being processed")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Voting configuration exclusion failed: {0}")]
    Coordination(String),

    #[error("Node removal failed: {0}")]
    MembershipRemoval(String),

    #[error("Node removal is disabled by {0}")]
    RemovalDisabled(&'static str),

    /// Leadership moved away from the local node. The request should be
    /// retried against the new cluster manager.
    #[error("Node {node} is not the cluster manager (current: {manager:?})")]
    NotClusterManager {
        node: NodeId,
        manager: Option<NodeId>,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("No decommission in progress")]
    NotFound,

    #[error("Decommission of {requested} doesn't match the registered {registered}")]
    AttributeMismatch {
        requested: DecommissionAttribute,
        registered: DecommissionAttribute,
    },

    #[error("Cluster state writer is closed")]
    Closed,

    #[error("Decommission workflow stopped before acknowledging the request")]
    Interrupted,

    #[error("Timed out waiting for the decommission to complete")]
    Timeout,
}

impl Error {
    /// Whether the request may succeed if retried against another node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotClusterManager { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
