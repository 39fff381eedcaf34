//! Multi-controller TRACON simulation server.
//!
//! A [`SimManager`] owns the running [`Sim`] instances and the token registry
//! that routes controller calls into them. [`SimDispatcher`] is the single
//! entry point for remote requests, served over TCP by [`network`] and
//! consumed by the blocking [`client`].

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod metrics;
pub mod network;
pub mod sim;
pub mod tokens;

pub use client::{
    launch_local_server, ClientError, LocalSimServer, PendingCall, RpcClient, SimProxy, SimServer,
};
pub use config::{
    builtin_catalog, catalog_from_file, catalog_from_json_str, load_server_config_from_env,
    load_sim_configurations_from_env, ConfigError, ServerConfig,
};
pub use dispatcher::SimDispatcher;
pub use manager::SimManager;
pub use metrics::BandwidthStats;
pub use network::{start_rpc_server, RpcServer};
pub use sim::Sim;
pub use tokens::{generate_token, TokenRegistry};
