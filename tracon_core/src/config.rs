use std::{
    env, fs, io,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracon_runtime::{SimConfiguration, SimConfigurationCatalog};

pub const BUILTIN_SERVER_CONFIG: &str = include_str!("data/server_config.json");
pub const BUILTIN_SIM_CONFIGURATIONS: &str = include_str!("data/sim_configurations.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("configuration {name:?} is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// Process-level settings for the RPC server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    rpc_bind: SocketAddr,
    update_interval_ms: u64,
    bandwidth_log_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)),
            update_interval_ms: 10,
            bandwidth_log_interval_secs: 15,
        }
    }
}

impl ServerConfig {
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_SERVER_CONFIG) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    target: "tracon::config",
                    error = %err,
                    "server_config.builtin_invalid"
                );
                Self::default()
            }
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = read_config(path)?;
        Ok(Self::from_json_str(&contents)?)
    }

    pub fn rpc_bind(&self) -> SocketAddr {
        self.rpc_bind
    }

    /// Wall-clock period between update steps; never zero.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn bandwidth_log_interval(&self) -> Duration {
        Duration::from_secs(self.bandwidth_log_interval_secs)
    }
}

pub fn catalog_from_json_str(json: &str) -> Result<SimConfigurationCatalog, ConfigError> {
    let catalog: SimConfigurationCatalog = serde_json::from_str(json)?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

pub fn catalog_from_file(path: &Path) -> Result<SimConfigurationCatalog, ConfigError> {
    let contents = read_config(path)?;
    catalog_from_json_str(&contents)
}

pub fn builtin_catalog() -> Result<SimConfigurationCatalog, ConfigError> {
    catalog_from_json_str(BUILTIN_SIM_CONFIGURATIONS)
}

/// Cross-reference checks the JSON schema cannot express.
pub fn validate_catalog(catalog: &SimConfigurationCatalog) -> Result<(), ConfigError> {
    for (name, config) in catalog {
        validate_configuration(config).map_err(|reason| ConfigError::Invalid {
            name: name.clone(),
            reason,
        })?;
    }
    Ok(())
}

fn validate_configuration(config: &SimConfiguration) -> Result<(), String> {
    if config.primary_controller.is_empty() {
        return Err("primary_controller is empty".to_string());
    }
    let positions = config.positions();
    for (approach, details) in &config.approaches {
        if !config.locations.contains_key(&details.final_fix) {
            return Err(format!(
                "approach {approach} references unknown fix {}",
                details.final_fix
            ));
        }
    }
    let mut callsigns = std::collections::BTreeSet::new();
    for spawn in &config.spawns {
        if !callsigns.insert(spawn.callsign.as_str()) {
            return Err(format!("duplicate spawn callsign {}", spawn.callsign));
        }
        if let Some(controller) = &spawn.controller {
            if !positions.contains(controller) {
                return Err(format!(
                    "spawn {} is owned by unknown position {controller}",
                    spawn.callsign
                ));
            }
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_server_config_from_env() -> (ServerConfig, Option<PathBuf>) {
    let Some(path) = env::var("TRACON_SERVER_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(target: "tracon::config", "server_config.loaded=builtin");
        return (ServerConfig::builtin(), None);
    };

    match ServerConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "tracon::config",
                path = %path.display(),
                "server_config.loaded=file"
            );
            (config, Some(path))
        }
        Err(err) => {
            tracing::warn!(
                target: "tracon::config",
                path = %path.display(),
                error = %err,
                "server_config.load_failed"
            );
            (ServerConfig::builtin(), None)
        }
    }
}

/// Loads the scenario catalog from `SIM_CONFIGURATIONS_PATH`, falling back to
/// the compiled-in catalog when the override is absent or unusable.
pub fn load_sim_configurations_from_env(
) -> Result<(SimConfigurationCatalog, Option<PathBuf>), ConfigError> {
    if let Some(path) = env::var("SIM_CONFIGURATIONS_PATH").ok().map(PathBuf::from) {
        match catalog_from_file(&path) {
            Ok(catalog) => {
                tracing::info!(
                    target: "tracon::config",
                    path = %path.display(),
                    configurations = catalog.len(),
                    "sim_configurations.loaded=file"
                );
                return Ok((catalog, Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "tracon::config",
                    path = %path.display(),
                    error = %err,
                    "sim_configurations.load_failed"
                );
            }
        }
    }

    let catalog = builtin_catalog()?;
    tracing::info!(
        target: "tracon::config",
        configurations = catalog.len(),
        "sim_configurations.loaded=builtin"
    );
    Ok((catalog, None))
}
