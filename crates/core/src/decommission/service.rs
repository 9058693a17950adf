use {
    super::{
        workflow::{Exit, Workflow},
        ConflictError,
        Controller,
        DecommissionAttribute,
        DecommissionMetadata,
        DecommissionStatus,
        Error,
        Result,
    },
    crate::{
        awareness::AttributeCatalog,
        cluster::{NodeId, StateUpdater},
        coordination::{Coordination, VOTING_CONFIG_EXCLUSION_TIMEOUT},
        membership::Membership,
    },
    futures::StreamExt,
    std::{pin::pin, sync::Arc, time::Duration},
    tap::Pipe as _,
    tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard},
    tracing::Instrument as _,
};

/// Default timeout of the removal of decommissioned nodes.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout of the removal of decommissioned nodes.
    pub drain_timeout: Duration,

    /// Timeout of the voting configuration exclusion.
    pub voting_exclusion_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drain_timeout: DRAIN_TIMEOUT,
            voting_exclusion_timeout: VOTING_CONFIG_EXCLUSION_TIMEOUT,
        }
    }
}

/// Entry point of awareness attribute decommissioning on a node.
///
/// Only one decommission workflow runs at a time. Requests for another
/// attribute are rejected with [`ConflictError::InFlight`], or with
/// [`ConflictError::Busy`] if they race with the admission of a request.
/// Resubmissions of the running attribute share the acknowledgement of the
/// request that started the workflow.
#[derive(Clone)]
pub struct Service<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    inner: Arc<Inner<S, C, M>>,
}

struct Inner<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    local_node: NodeId,
    catalog: AttributeCatalog,
    controller: Controller<S, C, M>,
    config: Config,
    lock: Arc<Mutex<()>>,

    /// Workflow running on this node, if any.
    active: Arc<watch::Sender<Option<Running>>>,
}

#[derive(Clone, Debug)]
struct Running {
    attribute: DecommissionAttribute,
    ack: Ack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ack {
    Pending,
    Accepted,
    Rejected,
}

/// Answers the request that started a workflow.
///
/// Holds the admission lock until the answer is sent.
pub(super) struct Responder {
    tx: oneshot::Sender<Result<()>>,
    active: Arc<watch::Sender<Option<Running>>>,
    _admission: OwnedMutexGuard<()>,
}

impl Responder {
    pub(super) fn send(self, result: Result<()>) {
        let ack = if result.is_ok() {
            Ack::Accepted
        } else {
            Ack::Rejected
        };

        self.active.send_modify(|running| {
            if let Some(running) = running {
                running.ack = ack;
            }
        });

        let _ = self.tx.send(result);
    }
}

impl<S, C, M> Service<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    pub fn new(
        local_node: NodeId,
        catalog: AttributeCatalog,
        controller: Controller<S, C, M>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_node,
                catalog,
                controller,
                config,
                lock: Arc::new(Mutex::new(())),
                active: Arc::new(watch::channel(None).0),
            }),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.inner.local_node
    }

    /// Starts decommissioning the nodes having the attribute.
    ///
    /// Returns once the nodes are excluded from the voting configuration and
    /// the local node is confirmed to still be the cluster manager. The nodes
    /// are then drained in the background.
    ///
    /// The decommission is registered and driven by a spawned task, so
    /// dropping the returned future doesn't abandon it.
    pub async fn start_decommission(&self, attribute: DecommissionAttribute) -> Result<()> {
        self.require_cluster_manager()?;
        attribute.validate(&self.inner.catalog.snapshot())?;

        if self.is_running(&attribute)? {
            return self.follow(&attribute).await;
        }

        let Ok(admission) = self.inner.lock.clone().try_lock_owned() else {
            tracing::warn!(%attribute, "rejecting concurrent decommission request");
            return Err(ConflictError::Busy.into());
        };

        // The running workflow may have released the lock after acknowledging.
        if self.is_running(&attribute)? {
            drop(admission);
            return self.follow(&attribute).await;
        }

        let (tx, rx) = oneshot::channel();
        let responder = Responder {
            tx,
            active: self.inner.active.clone(),
            _admission: admission,
        };

        self.inner.active.send_replace(Some(Running {
            attribute: attribute.clone(),
            ack: Ack::Pending,
        }));

        let inner = self.inner.clone();
        let span = tracing::info_span!("decommission", %attribute, local_node = %inner.local_node);

        async move {
            match inner.controller.register(attribute.clone()).await {
                Ok(()) => {
                    metrics::counter!("zonal_decommission_started").increment(1);

                    let workflow = Workflow::new(
                        attribute,
                        inner.local_node.clone(),
                        inner.controller.clone(),
                        inner.config.clone(),
                        inner.lock.clone(),
                        responder,
                    );

                    match workflow.run().await {
                        Exit::Finished(status) => tracing::info!(%status, "workflow finished"),
                        Exit::HandedOver => tracing::info!("workflow handed over"),
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to register the decommission");
                    responder.send(Err(err));
                }
            }

            inner.active.send_replace(None);
        }
        .instrument(span)
        .pipe(tokio::spawn);

        rx.await.map_err(|_| Error::Interrupted)?
    }

    /// Whether a workflow of the attribute is running on this node. Fails if
    /// a workflow of another attribute is.
    fn is_running(&self, attribute: &DecommissionAttribute) -> Result<bool> {
        match self.inner.active.borrow().as_ref() {
            Some(running) if &running.attribute == attribute => Ok(true),
            Some(running) => Err(ConflictError::InFlight(running.attribute.clone()).into()),
            None => Ok(false),
        }
    }

    /// Waits for the running workflow of the attribute to answer the request
    /// that started it, and answers the same.
    async fn follow(&self, attribute: &DecommissionAttribute) -> Result<()> {
        let mut active = self.inner.active.subscribe();

        let ack = active
            .wait_for(|running| {
                !matches!(running, Some(r) if &r.attribute == attribute && r.ack == Ack::Pending)
            })
            .await
            .map_err(|_| Error::Closed)?
            .as_ref()
            .filter(|running| &running.attribute == attribute)
            .map(|running| running.ack);

        if ack == Some(Ack::Accepted) {
            tracing::info!(%attribute, "decommission is already running");
            return Ok(());
        }

        self.require_cluster_manager()?;
        Err(Error::Interrupted)
    }

    /// Current decommission record, if any.
    pub fn get_decommission_state(&self) -> Option<DecommissionMetadata> {
        self.inner
            .controller
            .state()
            .metadata()
            .custom::<DecommissionMetadata>()
            .cloned()
    }

    /// Deletes the decommission record, allowing the attribute to be
    /// decommissioned again.
    pub async fn clear_decommission_status(&self) -> Result<()> {
        self.require_cluster_manager()?;
        self.inner.controller.delete_metadata().await
    }

    /// Waits for the decommission to reach a terminal status and for the
    /// local workflow to exit.
    pub async fn wait_for_terminal(&self, timeout: Duration) -> Result<DecommissionStatus> {
        let mut updates = pin!(self.inner.controller.updates());
        let mut active = self.inner.active.subscribe();

        let wait = async {
            let status = loop {
                match self.get_decommission_state() {
                    Some(metadata) if metadata.status().is_terminal() => break metadata.status(),
                    _ => {}
                }

                if updates.next().await.is_none() {
                    return Err(Error::Closed);
                }
            };

            active
                .wait_for(|active| active.is_none())
                .await
                .map_err(|_| Error::Closed)?;

            Ok(status)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout)?
    }

    fn require_cluster_manager(&self) -> Result<()> {
        let state = self.inner.controller.state();
        let nodes = state.nodes();

        if nodes.is_manager(&self.inner.local_node) {
            return Ok(());
        }

        Err(Error::NotClusterManager {
            node: self.inner.local_node.clone(),
            manager: nodes.manager_id().cloned(),
        })
    }
}
