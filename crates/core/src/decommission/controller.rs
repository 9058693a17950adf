//! Decommission side effects: metadata updates through the state queue,
//! voting configuration exclusions and node removals.

use {
    super::{
        DecommissionAttribute,
        DecommissionMetadata,
        DecommissionStatus,
        Error,
        Result,
        NODES_DECOMMISSIONED_REASON,
    },
    crate::{
        cluster::{ClusterState, NodeId, Priority, StateUpdater, UpdateError},
        coordination::Coordination,
        kill_switch::{self, KillSwitch},
        membership::Membership,
    },
    futures::Stream,
    std::{collections::BTreeSet, sync::Arc, time::Duration},
};

impl From<UpdateError<Error>> for Error {
    fn from(err: UpdateError<Error>) -> Self {
        match err {
            UpdateError::Task(err) => err,
            UpdateError::Closed => Self::Closed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Controller<S, C, M> {
    updater: S,
    coordination: C,
    membership: M,
    kill_switch: KillSwitch,
}

impl<S, C, M> Controller<S, C, M>
where
    S: StateUpdater,
    C: Coordination,
    M: Membership,
{
    pub fn new(updater: S, coordination: C, membership: M) -> Self {
        Self {
            updater,
            coordination,
            membership,
            kill_switch: kill_switch::AWARENESS_ATTRIBUTE_DECOMMISSION,
        }
    }

    /// Overrides the [`KillSwitch`] guarding node removal.
    pub fn with_kill_switch(mut self, kill_switch: KillSwitch) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.updater.state()
    }

    pub fn updates(&self) -> impl Stream<Item = ()> + Send + 'static {
        self.updater.updates()
    }

    /// Registers a decommission of the attribute in
    /// [`DecommissionStatus::Init`].
    ///
    /// Re-registering an attribute with a non-terminal decommission is a
    /// no-op.
    pub async fn register(&self, attribute: DecommissionAttribute) -> Result<()> {
        self.updater
            .submit(
                "decommission-init",
                Priority::Urgent,
                move |state: &ClusterState| -> Result<Option<ClusterState>> {
                    if let Some(current) = state.metadata().custom::<DecommissionMetadata>() {
                        if current.attribute() == &attribute && !current.status().is_terminal() {
                            tracing::info!(
                                %attribute,
                                status = %current.status(),
                                "decommission already registered"
                            );
                            return Ok(None);
                        }

                        current.ensure_no_inflight(&attribute)?;
                    }

                    tracing::info!(%attribute, "decommission registered");
                    let metadata = DecommissionMetadata::new(attribute);
                    Ok(Some(state.to_builder().put_custom(metadata).build()))
                },
            )
            .await?;

        Ok(())
    }

    /// Transitions the decommission of the attribute to `status`.
    pub async fn update_status(
        &self,
        attribute: &DecommissionAttribute,
        status: DecommissionStatus,
    ) -> Result<()> {
        let attribute = attribute.clone();

        self.updater
            .submit(
                "update-decommission-status",
                Priority::Urgent,
                move |state: &ClusterState| -> Result<Option<ClusterState>> {
                    let current = state
                        .metadata()
                        .custom::<DecommissionMetadata>()
                        .ok_or(Error::NotFound)?;

                    if current.attribute() != &attribute {
                        return Err(Error::AttributeMismatch {
                            requested: attribute,
                            registered: current.attribute().clone(),
                        });
                    }

                    if current.status() == status {
                        return Ok(None);
                    }

                    current.status().require_transition(status)?;

                    tracing::info!(%attribute, from = %current.status(), to = %status, "decommission status updated");
                    let metadata = current.with_status(status);
                    Ok(Some(state.to_builder().put_custom(metadata).build()))
                },
            )
            .await?;

        Ok(())
    }

    /// Deletes the decommission record, if any.
    pub async fn delete_metadata(&self) -> Result<()> {
        self.updater
            .submit(
                "delete-decommission-state",
                Priority::Urgent,
                |state: &ClusterState| -> Result<Option<ClusterState>> {
                    if state.metadata().custom::<DecommissionMetadata>().is_none() {
                        return Ok(None);
                    }

                    tracing::info!("decommission record deleted");
                    Ok(Some(
                        state.to_builder().remove_custom::<DecommissionMetadata>().build(),
                    ))
                },
            )
            .await?;

        Ok(())
    }

    pub async fn exclude_from_voting_config(
        &self,
        ids: BTreeSet<NodeId>,
        timeout: Duration,
    ) -> Result<()> {
        self.coordination
            .exclude_from_voting_config(ids, timeout)
            .await
            .map_err(|err| Error::Coordination(err.to_string()))
    }

    pub async fn clear_voting_config_exclusions(&self) -> Result<()> {
        self.coordination
            .clear_voting_config_exclusions()
            .await
            .map_err(|err| Error::Coordination(err.to_string()))
    }

    /// Removes decommissioned nodes from the cluster, unless the
    /// [`KillSwitch`] is engaged.
    pub async fn remove_decommissioned_nodes(
        &self,
        ids: BTreeSet<NodeId>,
        timeout: Duration,
    ) -> Result<()> {
        if self.kill_switch.is_engaged() {
            return Err(Error::RemovalDisabled(self.kill_switch.name()));
        }

        self.membership
            .remove_nodes(ids, NODES_DECOMMISSIONED_REASON, timeout)
            .await
            .map_err(|err| Error::MembershipRemoval(err.to_string()))
    }
}
