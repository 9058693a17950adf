//! State machine driving a single decommission from the voting exclusion to
//! a terminal status.

use {
    super::{
        service::{Config, Responder},
        Controller,
        DecommissionAttribute,
        DecommissionStatus,
        Error,
        Result,
    },
    crate::{
        cluster::{ClusterState, NodeId, StateUpdater},
        coordination::Coordination,
        membership::Membership,
    },
    std::{collections::BTreeSet, sync::Arc},
    tokio::sync::Mutex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Excluding the cluster-manager-eligible nodes of the attribute from
    /// the voting configuration.
    Exclude,

    /// Making sure the local node is still the cluster manager.
    LeadershipCheck,

    /// Removing the nodes of the attribute from the cluster.
    Drain,

    /// Clearing the exclusions and recording the terminal status.
    Finalize(Outcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Drained,
    Failed,
}

/// How a [`Workflow`] run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Exit {
    Finished(DecommissionStatus),

    /// Leadership moved to another node, which takes the decommission over.
    HandedOver,
}

pub(super) struct Workflow<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    attribute: DecommissionAttribute,
    local_node: NodeId,
    controller: Controller<S, C, M>,
    config: Config,
    drain_lock: Arc<Mutex<()>>,
    phase: Phase,
    responder: Option<Responder>,
    finalizer: Finalizer<S, C, M>,
}

impl<S, C, M> Workflow<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    pub(super) fn new(
        attribute: DecommissionAttribute,
        local_node: NodeId,
        controller: Controller<S, C, M>,
        config: Config,
        drain_lock: Arc<Mutex<()>>,
        responder: Responder,
    ) -> Self {
        Self {
            finalizer: Finalizer {
                inner: Some((controller.clone(), attribute.clone())),
            },
            attribute,
            local_node,
            controller,
            config,
            drain_lock,
            phase: Phase::Exclude,
            responder: Some(responder),
        }
    }

    pub(super) async fn run(mut self) -> Exit {
        loop {
            let next = match self.phase {
                Phase::Exclude => self.exclude().await,
                Phase::LeadershipCheck => match self.check_leadership() {
                    Some(next) => next,
                    None => {
                        self.finalizer.disarm();
                        return Exit::HandedOver;
                    }
                },
                Phase::Drain => self.drain().await,
                Phase::Finalize(outcome) => {
                    self.finalizer.disarm();
                    let status = finalize(&self.controller, &self.attribute, outcome).await;
                    self.respond(Err(Error::Interrupted));
                    return Exit::Finished(status);
                }
            };

            tracing::debug!(from = ?self.phase, to = ?next, "transitioned");
            self.phase = next;
        }
    }

    async fn exclude(&mut self) -> Phase {
        let state = self.controller.state();
        let ids = self.nodes(&state, true);

        if !state.coordination().last_committed_config().contains_any(&ids) {
            tracing::info!(?ids, "nodes are already excluded from the voting configuration");
            return Phase::LeadershipCheck;
        }

        match self
            .controller
            .exclude_from_voting_config(ids, self.config.voting_exclusion_timeout)
            .await
        {
            Ok(()) => Phase::LeadershipCheck,
            Err(err) => {
                tracing::error!(?err, "failed to exclude nodes from the voting configuration");
                self.respond(Err(err));
                Phase::Finalize(Outcome::Failed)
            }
        }
    }

    /// Acknowledges the request if the local node is still the cluster
    /// manager. Otherwise the request is rejected as retryable and the
    /// workflow is left for the new cluster manager to resume.
    fn check_leadership(&mut self) -> Option<Phase> {
        let state = self.controller.state();
        let nodes = state.nodes();

        let eligible = nodes.is_manager(&self.local_node)
            && nodes
                .get(&self.local_node)
                .is_some_and(|n| n.is_cluster_manager_eligible() && !self.attribute.matches(n));

        if eligible {
            self.respond(Ok(()));
            return Some(Phase::Drain);
        }

        tracing::warn!(
            local_node = %self.local_node,
            manager = ?nodes.manager_id(),
            "cluster manager changed, handing the decommission over"
        );
        self.respond(Err(Error::NotClusterManager {
            node: self.local_node.clone(),
            manager: nodes.manager_id().cloned(),
        }));

        None
    }

    async fn drain(&mut self) -> Phase {
        let _guard = self.drain_lock.clone().lock_owned().await;

        if let Err(err) = self
            .controller
            .update_status(&self.attribute, DecommissionStatus::InProgress)
            .await
        {
            tracing::error!(?err, "failed to mark the decommission as in progress");
            return Phase::Finalize(Outcome::Failed);
        }

        let ids = self.nodes(&self.controller.state(), false);
        tracing::info!(?ids, "removing decommissioned nodes");

        match self
            .controller
            .remove_decommissioned_nodes(ids, self.config.drain_timeout)
            .await
        {
            Ok(()) => Phase::Finalize(Outcome::Drained),
            Err(err @ Error::RemovalDisabled(_)) => {
                tracing::warn!(%err, "skipping removal of decommissioned nodes");
                Phase::Finalize(Outcome::Failed)
            }
            Err(err) => {
                tracing::error!(?err, "failed to remove decommissioned nodes");
                Phase::Finalize(Outcome::Failed)
            }
        }
    }

    /// Nodes carrying the attribute, optionally only the
    /// cluster-manager-eligible ones.
    fn nodes(&self, state: &ClusterState, manager_eligible_only: bool) -> BTreeSet<NodeId> {
        state
            .nodes()
            .with_attribute(self.attribute.name(), self.attribute.value())
            .filter(|n| !manager_eligible_only || n.is_cluster_manager_eligible())
            .map(|n| n.id().clone())
            .collect()
    }

    fn respond(&mut self, result: Result<()>) {
        if let Some(responder) = self.responder.take() {
            responder.send(result);
        }
    }
}

async fn finalize<S, C, M>(
    controller: &Controller<S, C, M>,
    attribute: &DecommissionAttribute,
    outcome: Outcome,
) -> DecommissionStatus
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    let status = match controller.clear_voting_config_exclusions().await {
        Ok(()) if outcome == Outcome::Drained => DecommissionStatus::Successful,
        Ok(()) => DecommissionStatus::Failed,
        Err(err) => {
            tracing::error!(?err, "failed to clear voting configuration exclusions");
            DecommissionStatus::Failed
        }
    };

    match controller.update_status(attribute, status).await {
        Ok(()) => tracing::info!(%status, "decommission finished"),
        Err(err) => tracing::error!(?err, %status, "failed to record the decommission status"),
    }

    metrics::counter!("zonal_decommission_finished", "status" => status.as_str()).increment(1);

    status
}

/// Finalizes the decommission as failed if the [`Workflow`] is dropped
/// mid-way, e.g. because its task got cancelled.
struct Finalizer<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    inner: Option<(Controller<S, C, M>, DecommissionAttribute)>,
}

impl<S, C, M> Finalizer<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl<S, C, M> Drop for Finalizer<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    fn drop(&mut self) {
        let Some((controller, attribute)) = self.inner.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(%attribute, "decommission workflow dropped outside of a runtime");
            return;
        };

        tracing::warn!(%attribute, "decommission workflow dropped, finalizing");
        runtime.spawn(async move {
            finalize(&controller, &attribute, Outcome::Failed).await;
        });
    }
}
