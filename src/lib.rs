#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod reconcile;
pub mod registry;
pub mod watch;

pub use self::{
    cluster::{ClusterApi, KubeCluster},
    config::{Args, Config},
    dispatch::{Dispatcher, Snapshot},
    reconcile::Syndicator,
    registry::NamespaceRegistry,
};
