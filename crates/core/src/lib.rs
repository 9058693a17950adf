//! Zone-aware shard placement and awareness attribute decommissioning.

#![allow(clippy::manual_async_fn)]

pub use {
    allocation::Allocator,
    awareness::{AttributeCatalog, AwarenessAttributes},
    cluster::{ClusterService, ClusterState, StateUpdater},
    coordination::{Coordination, LocalCoordinator},
    kill_switch::KillSwitch,
    membership::{LocalMembership, Membership},
    settings::Setting,
};

pub mod allocation;
pub mod awareness;
pub mod cluster;
pub mod coordination;
pub mod decommission;
pub mod kill_switch;
pub mod membership;
pub mod placement;
pub mod settings;
