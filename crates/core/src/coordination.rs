//! Voting configuration management required for decommissioning
//! cluster-manager-eligible nodes.

use {
    crate::cluster::{ClusterState, NodeId, Priority, StateUpdater, UpdateError},
    std::{collections::BTreeSet, error::Error as StdError, future::Future, time::Duration},
};

/// Default timeout of [`Coordination::exclude_from_voting_config`].
pub const VOTING_CONFIG_EXCLUSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Consensus functionality the decommission workflow depends on.
///
/// The implementor is expected to return only after the change has been
/// committed to the cluster state.
pub trait Coordination: Clone + Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    /// Excludes the nodes from the voting configuration.
    fn exclude_from_voting_config(
        &self,
        ids: BTreeSet<NodeId>,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Clears every voting configuration exclusion.
    fn clear_voting_config_exclusions(&self)
        -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Excluding {excluded} of {total} voting nodes would lose the quorum")]
    QuorumLoss { excluded: usize, total: usize },

    #[error("No cluster-manager-eligible node left to take over")]
    NoEligibleManager,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cluster state writer is closed")]
    Closed,
}

impl From<UpdateError<Error>> for Error {
    fn from(err: UpdateError<Error>) -> Self {
        match err {
            UpdateError::Task(err) => err,
            UpdateError::Closed => Self::Closed,
        }
    }
}

/// [`Coordination`] over the local [`StateUpdater`].
///
/// Excluded nodes leave the voting configuration immediately. If the
/// cluster manager gets excluded, the lowest id remaining voter takes over.
#[derive(Clone, Debug)]
pub struct LocalCoordinator<S> {
    updater: S,
}

impl<S: StateUpdater> LocalCoordinator<S> {
    pub fn new(updater: S) -> Self {
        Self { updater }
    }
}

impl<S: StateUpdater> Coordination for LocalCoordinator<S> {
    type Error = Error;

    fn exclude_from_voting_config(
        &self,
        ids: BTreeSet<NodeId>,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        let update = self.updater.submit(
            "add-voting-config-exclusions",
            Priority::Urgent,
            move |state: &ClusterState| exclude(state, &ids),
        );

        async move {
            tokio::time::timeout(timeout, update)
                .await
                .map_err(|_| Error::Timeout(timeout))??;
            Ok(())
        }
    }

    fn clear_voting_config_exclusions(&self) -> impl Future<Output = Result<(), Error>> + Send {
        let update = self.updater.submit(
            "clear-voting-config-exclusions",
            Priority::Urgent,
            |state: &ClusterState| Ok::<_, Error>(clear_exclusions(state)),
        );

        async move {
            update.await?;
            Ok(())
        }
    }
}

fn exclude(state: &ClusterState, ids: &BTreeSet<NodeId>) -> Result<Option<ClusterState>, Error> {
    let coordination = state.coordination();
    let config = coordination.last_committed_config();

    if ids.is_subset(coordination.voting_config_exclusions()) && !config.contains_any(ids) {
        return Ok(None);
    }

    let new_config = config.without(ids);
    if !config.has_quorum(new_config.iter()) {
        return Err(Error::QuorumLoss {
            excluded: config.iter().filter(|id| ids.contains(*id)).count(),
            total: config.len(),
        });
    }

    let manager_excluded = state.nodes().manager_id().is_some_and(|id| ids.contains(id));
    let new_manager = if manager_excluded {
        let id = new_config
            .iter()
            .find(|id| {
                state
                    .nodes()
                    .get(id)
                    .is_some_and(|n| n.is_cluster_manager_eligible())
            })
            .cloned()
            .ok_or(Error::NoEligibleManager)?;

        tracing::info!(new_manager = %id, "cluster manager excluded from voting, handing over");
        Some(id)
    } else {
        state.nodes().manager_id().cloned()
    };

    let mut exclusions = coordination.voting_config_exclusions().clone();
    exclusions.extend(ids.iter().cloned());

    tracing::info!(?ids, "excluding nodes from the voting configuration");

    let mut builder = state.to_builder();
    builder.coordination_mut().set_last_committed_config(new_config);
    builder.coordination_mut().set_voting_config_exclusions(exclusions);
    builder.nodes_mut().set_manager(new_manager);
    Ok(Some(builder.build()))
}

/// Clears the exclusions, returning the excluded nodes that are still
/// cluster members back to the voting configuration.
fn clear_exclusions(state: &ClusterState) -> Option<ClusterState> {
    let coordination = state.coordination();
    let exclusions = coordination.voting_config_exclusions();

    if exclusions.is_empty() {
        return None;
    }

    let returning: Vec<&NodeId> = exclusions
        .iter()
        .filter(|id| {
            state
                .nodes()
                .get(id)
                .is_some_and(|n| n.is_cluster_manager_eligible())
        })
        .collect();

    tracing::info!(?exclusions, ?returning, "clearing voting configuration exclusions");

    let config = coordination.last_committed_config().with(returning);

    let mut builder = state.to_builder();
    builder.coordination_mut().set_last_committed_config(config);
    builder.coordination_mut().set_voting_config_exclusions(BTreeSet::new());
    Some(builder.build())
}
