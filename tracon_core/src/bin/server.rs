use std::process;
use std::sync::Arc;

use tracing::{error, info};

use tracon_core::{
    load_server_config_from_env, load_sim_configurations_from_env, start_rpc_server,
    SimDispatcher, SimManager,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (server_config, server_config_path) = load_server_config_from_env();
    let (catalog, catalog_path) = match load_sim_configurations_from_env() {
        Ok(loaded) => loaded,
        Err(err) => {
            error!(
                target: "tracon::server",
                error = %err,
                "sim_configurations.unavailable"
            );
            process::exit(1);
        }
    };

    let configurations = catalog.len();
    let manager = Arc::new(SimManager::new(catalog, &server_config));
    let dispatcher = SimDispatcher::new(Arc::clone(&manager));
    let server = match start_rpc_server(server_config.rpc_bind(), dispatcher) {
        Ok(server) => server,
        Err(err) => {
            error!(
                target: "tracon::server",
                bind = %server_config.rpc_bind(),
                error = %err,
                "rpc.bind_failed"
            );
            process::exit(1);
        }
    };

    info!(
        target: "tracon::server",
        rpc_bind = %server.local_addr(),
        configurations,
        server_config = ?server_config_path,
        catalog = ?catalog_path,
        "TRACON server ready"
    );

    server.wait();
    manager.shutdown();
}
