#![allow(clippy::manual_async_fn)]

use {
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt, time::Duration},
};

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub use client::Client;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub use server::{Handler, Server};

/// Minimum (and default) time a decommission request may take.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time the nodes get to drain their traffic before removal.
pub const DEFAULT_DELAY_TIMEOUT: Duration = Duration::from_secs(120);

/// Admin API request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    PutDecommission(PutDecommissionRequest),
    GetDecommission,
    DeleteDecommission,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PutDecommission(_) => "put_decommission",
            Self::GetDecommission => "get_decommission",
            Self::DeleteDecommission => "delete_decommission",
        }
    }
}

/// Admin API response, one variant per [`Request`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    PutDecommission(Result<PutDecommissionResponse, ApiError>),
    GetDecommission(Result<GetDecommissionResponse, ApiError>),
    DeleteDecommission(Result<DeleteDecommissionResponse, ApiError>),
}

/// Request to decommission every node having the awareness attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutDecommissionRequest {
    pub attribute_name: String,
    pub attribute_value: String,

    /// Time the request may take. At least [`DEFAULT_REQUEST_TIMEOUT`].
    pub timeout: Duration,

    /// Time the nodes get to drain their traffic before removal.
    pub delay_timeout: Duration,

    /// Skips the traffic drain. Conflicts with a non-zero `delay_timeout`.
    pub no_delay: bool,

    /// Whether the client should follow the cluster manager if leadership
    /// moves away from the node serving the request.
    pub retry_on_cluster_manager_switch: bool,
}

impl PutDecommissionRequest {
    pub fn new(attribute_name: impl Into<String>, attribute_value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            attribute_value: attribute_value.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            delay_timeout: DEFAULT_DELAY_TIMEOUT,
            no_delay: false,
            retry_on_cluster_manager_switch: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_no_delay(mut self) -> Self {
        self.no_delay = true;
        self.delay_timeout = Duration::ZERO;
        self
    }

    pub fn with_retry_on_cluster_manager_switch(mut self) -> Self {
        self.retry_on_cluster_manager_switch = true;
        self
    }

    /// Collects every problem of the request.
    pub fn validate(&self) -> Result<(), InvalidRequestError> {
        let mut errors = Vec::new();

        if self.attribute_name.is_empty() {
            errors.push("attribute name is missing".to_string());
        }

        if self.attribute_value.is_empty() {
            errors.push("attribute value is missing".to_string());
        }

        if self.no_delay && !self.delay_timeout.is_zero() {
            errors.push(format!(
                "no_delay is true and delay_timeout is set to {}s",
                self.delay_timeout.as_secs()
            ));
        }

        if self.timeout < DEFAULT_REQUEST_TIMEOUT {
            errors.push("request timeout should be at least 2 minutes".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(InvalidRequestError(errors))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Validation failed: {}", .0.join("; "))]
pub struct InvalidRequestError(pub Vec<String>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutDecommissionResponse {
    pub acknowledged: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDecommissionResponse {
    pub acknowledged: bool,
}

/// Current decommission, `{"awareness": {"<name>": "<value>"}, "status":
/// "<status>"}`. Both fields are empty if there's none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDecommissionResponse {
    pub awareness: BTreeMap<String, String>,
    pub status: Option<DecommissionStatus>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecommissionStatus {
    Init,
    InProgress,
    Successful,
    Failed,
}

impl DecommissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

impl fmt::Display for DecommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::InProgress => "in_progress",
            Self::Successful => "successful",
            Self::Failed => "failed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Another decommission is in flight or already done.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Node {node} is not the cluster manager (current: {manager:?})")]
    NotClusterManager {
        node: String,
        manager: Option<String>,
    },

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether the request may succeed if sent to the current cluster
    /// manager.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotClusterManager { .. })
    }
}

#[cfg(test)]
mod test {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case::valid(PutDecommissionRequest::new("zone", "zone_1"), 0)]
    #[case::no_delay(PutDecommissionRequest::new("zone", "zone_1").with_no_delay(), 0)]
    #[case::missing_name(PutDecommissionRequest::new("", "zone_1"), 1)]
    #[case::missing_both(PutDecommissionRequest::new("", ""), 2)]
    #[case::short_timeout(
        PutDecommissionRequest::new("zone", "zone_1").with_timeout(Duration::from_secs(119)),
        1
    )]
    #[case::delay_conflict(
        PutDecommissionRequest { no_delay: true, ..PutDecommissionRequest::new("zone", "zone_1") },
        1
    )]
    fn request_validation(#[case] request: PutDecommissionRequest, #[case] errors: usize) {
        match request.validate() {
            Ok(()) => assert_eq!(errors, 0),
            Err(InvalidRequestError(found)) => assert_eq!(found.len(), errors, "{found:?}"),
        }
    }

    #[test]
    fn decommission_json_shape() {
        let response = GetDecommissionResponse {
            awareness: [("zone".to_string(), "zone_1".to_string())].into(),
            status: Some(DecommissionStatus::InProgress),
        };

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "awareness": { "zone": "zone_1" }, "status": "in_progress" })
        );
    }
}
