#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracon_core::{catalog_from_file, launch_local_server, LocalSimServer, ServerConfig, SimProxy};
use tracon_runtime::{Aircraft, NewSimConfiguration, SimError, World};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_sim_configurations.json")
}

/// In-process server on a loopback port, loaded with the test catalog.
pub fn local_server() -> Result<LocalSimServer> {
    let catalog = catalog_from_file(&fixture_path()).context("loading test catalog")?;
    let config = ServerConfig::default().with_update_interval(Duration::from_millis(5));
    Ok(launch_local_server(catalog, &config)?)
}

pub fn create(server: &LocalSimServer, name: &str) -> Result<(World, SimProxy)> {
    Ok(server
        .server()
        .new_sim(NewSimConfiguration::create_remote(name, "TEST"))?)
}

pub fn join(server: &LocalSimServer, name: &str, position: &str) -> Result<SimProxy> {
    let (_, proxy) = server
        .server()
        .new_sim(NewSimConfiguration::join(name, position))?;
    Ok(proxy)
}

pub fn aircraft(proxy: &SimProxy, callsign: &str) -> Result<Aircraft> {
    let update = proxy.get_world_update().wait_world_update()?;
    update
        .aircraft
        .get(callsign)
        .cloned()
        .ok_or_else(|| anyhow!("no aircraft {callsign} in world update"))
}

/// Server-side error carried by a failed call.
pub fn sim_error<T: std::fmt::Debug>(result: Result<T, tracon_core::ClientError>) -> Result<SimError> {
    match result {
        Ok(value) => Err(anyhow!("expected an error, got {value:?}")),
        Err(err) => err
            .sim_error()
            .cloned()
            .ok_or_else(|| anyhow!("expected a sim error, got {err}")),
    }
}
