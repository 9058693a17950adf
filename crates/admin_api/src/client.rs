use {
    super::*,
    std::future::Future,
};

/// Maximum number of times a [`PutDecommissionRequest`] follows the cluster
/// manager.
const MAX_CLUSTER_MANAGER_SWITCHES: usize = 3;

/// Delivers encoded [`Request`]s to the Admin API server of a node.
pub trait Transport: Clone + Send + Sync + 'static {
    fn call(
        &self,
        node: &str,
        request: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// [`Client`] config.
#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout of a [`Client`] operation, on top of the request's own
    /// timeout if it has one.
    pub operation_timeout: Duration,

    /// Node serving the Admin API.
    pub server: String,
}

impl Config {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
            server: server.into(),
        }
    }
}

/// Admin API client.
#[derive(Clone, Debug)]
pub struct Client<T> {
    transport: T,
    server: String,
    operation_timeout: Duration,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            server: config.server,
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn set_server(&mut self, server: impl Into<String>) {
        self.server = server.into();
    }

    /// Starts a decommission.
    ///
    /// If the request opts into it, the request gets resent to the new
    /// cluster manager when leadership moves away from the serving node.
    pub async fn put_decommission(
        &self,
        req: PutDecommissionRequest,
    ) -> Result<PutDecommissionResponse> {
        req.validate()
            .map_err(|err| Error::Api(ApiError::InvalidRequest(err.to_string())))?;

        let timeout = req.timeout + self.operation_timeout;
        let mut server = self.server.clone();
        let mut switches = 0;

        loop {
            let request = Request::PutDecommission(req.clone());
            let Response::PutDecommission(result) = self.call(&server, &request, timeout).await?
            else {
                return Err(Error::UnexpectedResponse);
            };

            match result {
                Err(ApiError::NotClusterManager {
                    manager: Some(manager),
                    ..
                }) if req.retry_on_cluster_manager_switch
                    && switches < MAX_CLUSTER_MANAGER_SWITCHES
                    && manager != server =>
                {
                    tracing::info!(from = %server, to = %manager, "cluster manager switched, resending");
                    server = manager;
                    switches += 1;
                }
                result => return result.map_err(Error::Api),
            }
        }
    }

    /// Gets the current decommission.
    pub async fn get_decommission(&self) -> Result<GetDecommissionResponse> {
        match self
            .call(&self.server, &Request::GetDecommission, self.operation_timeout)
            .await?
        {
            Response::GetDecommission(result) => result.map_err(Error::Api),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Deletes the decommission record.
    pub async fn delete_decommission(&self) -> Result<DeleteDecommissionResponse> {
        match self
            .call(&self.server, &Request::DeleteDecommission, self.operation_timeout)
            .await?
        {
            Response::DeleteDecommission(result) => result.map_err(Error::Api),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn call(&self, server: &str, request: &Request, timeout: Duration) -> Result<Response> {
        let bytes = postcard::to_allocvec(request).map_err(|err| Error::Codec(err.to_string()))?;

        let bytes = tokio::time::timeout(timeout, self.transport.call(server, bytes))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|err| Error::Transport(err.0))?;

        postcard::from_bytes(&bytes).map_err(|err| Error::Codec(err.to_string()))
    }
}

/// Error of a [`Client`] operation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// API error.
    #[error("API: {0}")]
    Api(ApiError),

    /// Transport error.
    #[error("Transport: {0}")]
    Transport(String),

    #[error("Codec: {0}")]
    Codec(String),

    /// Server responded to a different request.
    #[error("Unexpected response")]
    UnexpectedResponse,

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
}

/// [`Client`] operation [`Result`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
