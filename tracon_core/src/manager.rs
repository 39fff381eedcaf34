use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};
use tracon_runtime::{
    ControllerToken, NewSimConfiguration, NewSimResult, NewSimType, RemoteSim,
    SimConfigurationCatalog, SimError, SimSnapshot,
};

use crate::config::ServerConfig;
use crate::metrics::BandwidthStats;
use crate::sim::Sim;
use crate::tokens::TokenRegistry;

/// Registry of running instances and the tokens that route into them.
///
/// The registry lock only guards map operations; it is released before any
/// call into an instance.
pub struct SimManager {
    catalog: SimConfigurationCatalog,
    registry: Mutex<SimRegistry>,
    tokens: TokenRegistry<Sim>,
    bandwidth: Arc<BandwidthStats>,
    update_interval: Duration,
    stopping: Arc<AtomicBool>,
    update_loops: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct SimRegistry {
    named: BTreeMap<String, Arc<Sim>>,
    /// Unnamed instances; never listed and never joinable.
    anonymous: Vec<Arc<Sim>>,
}

impl SimManager {
    pub fn new(catalog: SimConfigurationCatalog, config: &ServerConfig) -> Self {
        Self {
            catalog,
            registry: Mutex::new(SimRegistry::default()),
            tokens: TokenRegistry::new(),
            bandwidth: Arc::new(BandwidthStats::new(config.bandwidth_log_interval())),
            update_interval: config.update_interval(),
            stopping: Arc::new(AtomicBool::new(false)),
            update_loops: Mutex::new(Vec::new()),
        }
    }

    pub fn bandwidth(&self) -> Arc<BandwidthStats> {
        Arc::clone(&self.bandwidth)
    }

    pub fn create_or_join(&self, request: &NewSimConfiguration) -> Result<NewSimResult, SimError> {
        match request.sim_type {
            NewSimType::CreateLocal | NewSimType::CreateRemote => self.create(request),
            NewSimType::JoinRemote => self.join(request),
        }
    }

    fn create(&self, request: &NewSimConfiguration) -> Result<NewSimResult, SimError> {
        let config = self
            .catalog
            .get(&request.configuration)
            .ok_or_else(|| SimError::UnknownConfiguration(request.configuration.clone()))?;
        let sim = Arc::new(Sim::new(&request.name, &request.configuration, config));

        // Joiners can only find the instance once its primary is signed on.
        sim.activate();
        let primary = sim.primary_controller();
        let (world, token) = sim.sign_on(&primary)?;
        self.register_token(&sim, &token)?;

        if let Err(err) = self.publish(&request.name, &sim) {
            self.tokens.revoke(&token);
            let _ = sim.sign_off(&token);
            sim.deactivate();
            return Err(err);
        }
        self.start_update_loop(Arc::clone(&sim));

        info!(
            target: "tracon::manager",
            sim = %request.name,
            configuration = %request.configuration,
            controller = %primary,
            "sim.started"
        );
        Ok(NewSimResult { world, token })
    }

    fn publish(&self, name: &str, sim: &Arc<Sim>) -> Result<(), SimError> {
        let mut registry = self.registry.lock();
        if name.is_empty() {
            registry.anonymous.push(Arc::clone(sim));
        } else if registry.named.contains_key(name) {
            return Err(SimError::DuplicateName(name.to_string()));
        } else {
            registry.named.insert(name.to_string(), Arc::clone(sim));
        }
        Ok(())
    }

    fn join(&self, request: &NewSimConfiguration) -> Result<NewSimResult, SimError> {
        let sim = self
            .registry
            .lock()
            .named
            .get(&request.name)
            .cloned()
            .ok_or_else(|| SimError::UnknownSimulation(request.name.clone()))?;

        let (world, token) = sim.sign_on(&request.position)?;
        self.register_token(&sim, &token)?;
        info!(
            target: "tracon::manager",
            sim = %request.name,
            controller = %request.position,
            "sim.joined"
        );
        Ok(NewSimResult { world, token })
    }

    fn register_token(&self, sim: &Arc<Sim>, token: &ControllerToken) -> Result<(), SimError> {
        self.tokens
            .register(token.clone(), Arc::clone(sim))
            .map_err(|err| {
                // The session must not outlive a token nobody can use.
                let _ = sim.sign_off(token);
                err
            })
    }

    pub fn list_configurations(&self) -> SimConfigurationCatalog {
        self.catalog.clone()
    }

    pub fn list_active_sims(&self) -> BTreeMap<String, RemoteSim> {
        let named: Vec<(String, Arc<Sim>)> = self
            .registry
            .lock()
            .named
            .iter()
            .map(|(name, sim)| (name.clone(), Arc::clone(sim)))
            .collect();
        named
            .into_iter()
            .map(|(name, sim)| (name, sim.remote_sim()))
            .collect()
    }

    /// The single lookup every token-carrying call goes through.
    pub fn resolve_token(&self, token: &ControllerToken) -> Option<Arc<Sim>> {
        self.bandwidth.maybe_log();
        self.tokens.resolve(token)
    }

    pub fn serialize_sim(&self, token: &ControllerToken) -> Result<SimSnapshot, SimError> {
        self.resolve_token(token)
            .ok_or(SimError::NoSimForToken)?
            .snapshot()
    }

    /// Deregisters the token before tearing down the session, so no new call
    /// can resolve a session that is going away.
    pub fn sign_off(&self, token: &ControllerToken) -> Result<(), SimError> {
        let sim = self.tokens.revoke(token).ok_or(SimError::NoSimForToken)?;
        sim.sign_off(token)?;
        info!(
            target: "tracon::manager",
            sim = %sim.name(),
            token = %token,
            "controller.signed_off"
        );
        Ok(())
    }

    pub fn change_control_position(
        &self,
        token: &ControllerToken,
        callsign: &str,
        keep_tracks: bool,
    ) -> Result<ControllerToken, SimError> {
        let sim = self.resolve_token(token).ok_or(SimError::NoSimForToken)?;
        let new_token = sim.change_control_position(token, callsign, keep_tracks)?;
        let registered = self.tokens.register(new_token.clone(), Arc::clone(&sim));
        self.tokens.revoke(token);
        if let Err(err) = registered {
            let _ = sim.sign_off(&new_token);
            return Err(err);
        }
        Ok(new_token)
    }

    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Stops every update loop and retires all tokens. Idempotent.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let sims: Vec<Arc<Sim>> = {
            let registry = self.registry.lock();
            registry
                .named
                .values()
                .chain(registry.anonymous.iter())
                .cloned()
                .collect()
        };
        for sim in &sims {
            sim.deactivate();
        }

        let loops: Vec<JoinHandle<()>> = self.update_loops.lock().drain(..).collect();
        for handle in loops {
            if handle.join().is_err() {
                warn!(target: "tracon::manager", "update_loop.panicked");
            }
        }
        let revoked = self.tokens.revoke_all();
        info!(
            target: "tracon::manager",
            sims = sims.len(),
            revoked,
            "manager.shutdown"
        );
    }

    fn start_update_loop(&self, sim: Arc<Sim>) {
        let stopping = Arc::clone(&self.stopping);
        let interval = self.update_interval;
        let label = if sim.name().is_empty() {
            "local".to_string()
        } else {
            sim.name().to_string()
        };

        let spawned = thread::Builder::new()
            .name(format!("sim-update-{label}"))
            .spawn(move || {
                while sim.is_active() && !stopping.load(Ordering::Acquire) {
                    sim.update();
                    thread::sleep(interval);
                }
            });
        match spawned {
            Ok(handle) => self.update_loops.lock().push(handle),
            Err(err) => warn!(
                target: "tracon::manager",
                sim = %label,
                error = %err,
                "update_loop.spawn_failed"
            ),
        }
    }
}

impl Drop for SimManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
