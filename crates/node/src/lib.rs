#![allow(clippy::manual_async_fn)]

use {
    futures::{Future, StreamExt as _},
    metrics_exporter_prometheus::PrometheusBuilder,
    std::{convert::Infallible, pin::pin, sync::Arc, time::Duration},
    tap::Pipe as _,
    tokio::signal::unix::Signal,
    zonal_core::{
        cluster::{
            self,
            ClusterState,
            CoordinationMetadata,
            NodeId,
            Nodes,
            Priority,
            RoutingTable,
            VotingConfiguration,
        },
        decommission::{self, Controller, DecommissionStatus},
        membership,
        Allocator,
        AttributeCatalog,
        ClusterService,
        LocalCoordinator,
        LocalMembership,
        Setting,
        StateUpdater as _,
    },
};
pub use {
    config::{Config, IndexConfig},
    logger::{LogFormat, Logger},
};

pub mod admin;
pub mod config;
pub mod logger;
pub mod signal;

pub type DecommissionService = decommission::Service<
    ClusterService,
    LocalCoordinator<ClusterService>,
    LocalMembership<ClusterService>,
>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Admin server error: {0}")]
    Server(#[from] hyper::Error),

    #[error("Failed to initialize signal listener: {0}")]
    Signal(#[from] std::io::Error),

    #[error("Failed to join peers: {0}")]
    Membership(#[from] membership::Error),

    #[error("Cluster state writer is closed")]
    Closed,
}

/// Local node managing the cluster.
///
/// The node owns the [`ClusterState`] writer, so it is the cluster manager
/// whenever it's cluster-manager-eligible.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    cluster: ClusterService,
    allocator: Allocator,
    membership: LocalMembership<ClusterService>,
    decommission: DecommissionService,
}

impl Node {
    /// Builds the initial [`ClusterState`] out of the [`Config`], spawns its
    /// writer and allocates the shards.
    pub async fn bootstrap(cfg: &Config) -> Result<Self, Error> {
        let allocator = Allocator::new(
            AttributeCatalog::default(),
            Setting::new(cfg.placement.clone()),
        );
        let cluster = ClusterService::spawn(initial_state(cfg));
        let membership = LocalMembership::new(cluster.clone(), allocator.clone());
        let controller = Controller::new(
            cluster.clone(),
            LocalCoordinator::new(cluster.clone()),
            membership.clone(),
        );

        let node = Self {
            id: cfg.node.id().clone(),
            decommission: decommission::Service::new(
                cfg.node.id().clone(),
                allocator.catalog().clone(),
                controller,
                cfg.decommission.clone(),
            ),
            cluster,
            allocator,
            membership,
        };

        node.apply_settings(cfg);
        node.reroute("bootstrap").await?;

        tracing::info!(
            id = %node.id,
            nodes = node.state().nodes().len(),
            manager = ?node.state().nodes().manager_id(),
            "node bootstrapped"
        );

        Ok(node)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.cluster.state()
    }

    pub fn decommission(&self) -> &DecommissionService {
        &self.decommission
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Applies the hot-reloadable part of the [`Config`]: awareness
    /// attributes and placement settings.
    pub fn apply_settings(&self, cfg: &Config) {
        let catalog = self.allocator.catalog();
        catalog.set_attributes(cfg.awareness_attributes.iter().cloned());
        catalog.set_forced_values(cfg.forced_values.clone());
        self.allocator.settings().set(cfg.placement.clone());
    }

    /// Applies the [`Config`] and adds its peers missing from the cluster.
    pub async fn reload(&self, cfg: &Config) -> Result<(), Error> {
        self.apply_settings(cfg);
        let joined = self.rejoin_peers(&cfg.peers).await?;
        tracing::info!(joined, "config reloaded");
        Ok(())
    }

    /// Adds the peers missing from the cluster, except for the ones having a
    /// decommissioned attribute value. Returns the number of joined peers.
    ///
    /// An attribute value stays decommissioned until its decommission fails
    /// or gets deleted.
    pub async fn rejoin_peers(&self, peers: &[cluster::Node]) -> Result<usize, Error> {
        let state = self.state();
        let decommissioned = self
            .decommission
            .get_decommission_state()
            .filter(|metadata| metadata.status() != DecommissionStatus::Failed);

        let missing: Vec<_> = peers
            .iter()
            .filter(|peer| !state.nodes().contains(peer.id()))
            .filter(|peer| {
                let rejected = decommissioned
                    .as_ref()
                    .is_some_and(|metadata| metadata.attribute().matches(peer));
                if rejected {
                    tracing::info!(id = %peer.id(), "peer is decommissioned, not joining");
                }
                !rejected
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let joined = missing.len();
        self.membership.join(missing).await?;
        Ok(joined)
    }

    async fn reroute(&self, source: &'static str) -> Result<(), Error> {
        let allocator = self.allocator.clone();

        self.cluster
            .submit(source, Priority::High, move |state: &ClusterState| {
                Ok::<_, Infallible>(allocator.reroute(state))
            })
            .await
            .map(drop)
            .map_err(|_| Error::Closed)
    }

    /// Completes in-flight shard recoveries every `interval`.
    ///
    /// No shard data is hosted by the process, so a recovery is done as soon
    /// as the next tick observes it.
    async fn recover_shards(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let allocator = self.allocator.clone();
            let res = self
                .cluster
                .submit("shard-started", Priority::Normal, move |state: &ClusterState| {
                    Ok::<_, Infallible>(allocator.start_initializing(state))
                })
                .await;

            if res.is_err() {
                tracing::warn!("cluster state writer is closed, stopping recoveries");
                return;
            }
        }
    }

    /// Reroutes every time awareness attributes or placement settings
    /// change.
    async fn reroute_on_changes(self) {
        let mut changes = pin!(futures::stream::select(
            self.allocator.catalog().subscribe(),
            self.allocator.settings().updates(),
        ));

        while changes.next().await.is_some() {
            if let Err(err) = self.reroute("settings-changed").await {
                tracing::warn!(%err, "stopping reroutes on settings changes");
                return;
            }
        }
    }

    async fn reload_on_signal(self, mut hangup: Signal) {
        while hangup.recv().await.is_some() {
            let res = match Config::from_env() {
                Ok(cfg) => self.reload(&cfg).await,
                Err(err) => {
                    tracing::warn!(%err, "failed to parse config, ignoring reload");
                    continue;
                }
            };

            if let Err(err) = res {
                tracing::warn!(%err, "failed to reload config");
            }
        }
    }
}

/// Nodes of the [`Config`] with every cluster-manager-eligible one voting.
fn initial_state(cfg: &Config) -> ClusterState {
    let nodes = Nodes::new(std::iter::once(cfg.node.clone()).chain(cfg.peers.iter().cloned()));

    let voters: Vec<NodeId> = nodes
        .cluster_manager_eligible()
        .map(|node| node.id().clone())
        .collect();

    let manager = if cfg.node.is_cluster_manager_eligible() {
        Some(cfg.node.id().clone())
    } else {
        voters.first().cloned()
    };

    let nodes = match manager {
        Some(id) => nodes.with_manager(id),
        None => nodes,
    };

    let routing = cfg
        .indices
        .iter()
        .fold(RoutingTable::default(), |table, index| {
            table.with_index(&index.name, index.shards, index.replicas)
        });

    ClusterState::new(nodes, CoordinationMetadata::new(VotingConfiguration::new(voters)))
        .with_routing_table(routing)
}

/// Bootstraps the [`Node`] and serves the admin API until `shutdown`
/// resolves.
pub async fn run(cfg: Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let node = Node::bootstrap(&cfg).await?;

    let background = [
        node.clone()
            .recover_shards(cfg.recovery_interval)
            .pipe(tokio::spawn),
        node.clone().reroute_on_changes().pipe(tokio::spawn),
        node.clone()
            .reload_on_signal(signal::reload()?)
            .pipe(tokio::spawn),
    ];

    let svc = admin::router(node.clone(), prometheus).into_make_service();

    tracing::info!(addr = %cfg.admin_addr, "starting admin server");

    let result = axum::Server::try_bind(&cfg.admin_addr)?
        .serve(svc)
        .with_graceful_shutdown(shutdown)
        .await;

    for task in background {
        task.abort();
    }

    tracing::info!(id = %node.id(), "node stopped");

    result.map_err(Into::into)
}
