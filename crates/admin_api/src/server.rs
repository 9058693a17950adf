use {
    super::*,
    std::future::Future,
    zonal_core::{
        cluster::StateUpdater,
        coordination::Coordination,
        decommission::{self, DecommissionAttribute, Service},
        membership::Membership,
    },
};

/// Admin API server.
pub trait Server: Clone + Send + Sync + 'static {
    /// Starts a decommission.
    fn put_decommission(
        &self,
        req: PutDecommissionRequest,
    ) -> impl Future<Output = Result<PutDecommissionResponse, ApiError>> + Send;

    /// Gets the current decommission.
    fn get_decommission(
        &self,
    ) -> impl Future<Output = Result<GetDecommissionResponse, ApiError>> + Send;

    /// Deletes the decommission record, recommissioning the attribute value.
    fn delete_decommission(
        &self,
    ) -> impl Future<Output = Result<DeleteDecommissionResponse, ApiError>> + Send;

    /// Wraps this [`Server`] into a [`Handler`] of encoded requests.
    fn into_handler(self) -> Handler<Self> {
        Handler { server: self }
    }
}

/// Decodes [`Request`]s, dispatches them to the [`Server`] and encodes the
/// [`Response`]s.
#[derive(Clone, Debug)]
pub struct Handler<S> {
    server: S,
}

impl<S: Server> Handler<S> {
    pub async fn handle(&self, request: &[u8]) -> Result<Vec<u8>, Error> {
        let request: Request = postcard::from_bytes(request)?;
        let name = request.name();

        let response = match request {
            Request::PutDecommission(req) => {
                Response::PutDecommission(self.server.put_decommission(req).await)
            }
            Request::GetDecommission => {
                Response::GetDecommission(self.server.get_decommission().await)
            }
            Request::DeleteDecommission => {
                Response::DeleteDecommission(self.server.delete_decommission().await)
            }
        };

        metrics::counter!("zonal_admin_api_requests", "rpc" => name).increment(1);

        Ok(postcard::to_allocvec(&response)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Codec: {0}")]
    Codec(#[from] postcard::Error),
}

impl From<decommission::Error> for ApiError {
    fn from(err: decommission::Error) -> Self {
        use decommission::Error as E;

        match err {
            E::Validation(err) => Self::InvalidRequest(err.to_string()),
            E::Conflict(err) => Self::Conflict(err.to_string()),
            E::NotClusterManager { node, manager } => Self::NotClusterManager {
                node: node.to_string(),
                manager: manager.map(|id| id.to_string()),
            },
            E::Timeout => Self::Timeout,
            err => Self::Internal(err.to_string()),
        }
    }
}

impl From<decommission::DecommissionStatus> for DecommissionStatus {
    fn from(status: decommission::DecommissionStatus) -> Self {
        use decommission::DecommissionStatus as S;

        match status {
            S::Init => Self::Init,
            S::InProgress => Self::InProgress,
            S::Successful => Self::Successful,
            S::Failed => Self::Failed,
        }
    }
}

impl<S, C, M> Server for Service<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    fn put_decommission(
        &self,
        req: PutDecommissionRequest,
    ) -> impl Future<Output = Result<PutDecommissionResponse, ApiError>> + Send {
        async move {
            req.validate()
                .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;

            let attribute = DecommissionAttribute::new(req.attribute_name, req.attribute_value);
            tracing::info!(%attribute, timeout = ?req.timeout, "decommission requested");

            tokio::time::timeout(req.timeout, self.start_decommission(attribute))
                .await
                .map_err(|_| ApiError::Timeout)??;

            Ok(PutDecommissionResponse { acknowledged: true })
        }
    }

    fn get_decommission(
        &self,
    ) -> impl Future<Output = Result<GetDecommissionResponse, ApiError>> + Send {
        let response = match self.get_decommission_state() {
            Some(metadata) => GetDecommissionResponse {
                awareness: [(
                    metadata.attribute().name().to_string(),
                    metadata.attribute().value().to_string(),
                )]
                .into(),
                status: Some(metadata.status().into()),
            },
            None => GetDecommissionResponse::default(),
        };

        async move { Ok(response) }
    }

    fn delete_decommission(
        &self,
    ) -> impl Future<Output = Result<DeleteDecommissionResponse, ApiError>> + Send {
        async move {
            self.clear_decommission_status().await?;
            tracing::info!("decommission record deleted");
            Ok(DeleteDecommissionResponse { acknowledged: true })
        }
    }
}
