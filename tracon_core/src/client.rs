//! Blocking RPC client.
//!
//! One reader thread per connection routes responses to callers by call id,
//! so any number of calls may be in flight. [`RpcClient::call`] waits for the
//! result; [`RpcClient::go`] hands back a [`PendingCall`] to collect later.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracon_runtime::{
    Aircraft, AircraftSpecifier, ControllerToken, EnvelopeDecodeError, EnvelopeEncodeError,
    HeadingAssignment, NewSimConfiguration, RemoteSim, RequestEnvelope, ResponseEnvelope,
    RpcRequest, RpcResponse, SimConfigurationCatalog, SimError, SimSnapshot, World, WorldUpdate,
};

use crate::config::ServerConfig;
use crate::dispatcher::SimDispatcher;
use crate::manager::SimManager;
use crate::network::{read_frame, start_rpc_server, write_frame, RpcServer, RPC_PATH};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server rejected handshake: {0}")]
    Handshake(String),
    #[error(transparent)]
    Encode(#[from] EnvelopeEncodeError),
    #[error(transparent)]
    Decode(#[from] EnvelopeDecodeError),
    #[error("connection closed")]
    Disconnected,
    #[error("timed out waiting for {operation}")]
    Timeout { operation: &'static str },
    #[error("unexpected response to {operation}")]
    UnexpectedResponse { operation: &'static str },
    #[error(transparent)]
    Sim(#[from] SimError),
}

impl ClientError {
    /// The server-side error, if the call reached the server.
    pub fn sim_error(&self) -> Option<&SimError> {
        match self {
            ClientError::Sim(err) => Some(err),
            _ => None,
        }
    }
}

type CallResult = Result<RpcResponse, ClientError>;

struct ClientShared {
    writer: Mutex<TcpStream>,
    pending: Mutex<PendingTable>,
    next_call_id: AtomicU64,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, Sender<CallResult>>,
    closed: bool,
}

pub struct RpcClient {
    shared: Arc<ClientShared>,
    reader: Option<JoinHandle<()>>,
}

impl RpcClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        writer.write_all(format!("CONNECT {RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())?;
        writer.flush()?;
        let mut status = String::new();
        reader.read_line(&mut status)?;
        if status.split_whitespace().nth(1) != Some("200") {
            return Err(ClientError::Handshake(status.trim().to_string()));
        }
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
                break;
            }
        }

        let shared = Arc::new(ClientShared {
            writer: Mutex::new(writer),
            pending: Mutex::new(PendingTable::default()),
            next_call_id: AtomicU64::new(1),
        });
        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("rpc-client-reader".to_string())
            .spawn(move || read_responses(reader, &reader_shared))?;

        Ok(Self {
            shared,
            reader: Some(reader),
        })
    }

    /// Sends `request` and returns immediately.
    pub fn go(&self, request: RpcRequest) -> PendingCall {
        let operation = request.name();
        let (sender, receiver) = bounded(1);
        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingCall {
            operation,
            receiver,
        };

        {
            let mut table = self.shared.pending.lock();
            if table.closed {
                let _ = sender.send(Err(ClientError::Disconnected));
                return pending;
            }
            table.calls.insert(call_id, sender);
        }

        if let Err(err) = self.send(call_id, request) {
            if let Some(sender) = self.shared.pending.lock().calls.remove(&call_id) {
                let _ = sender.send(Err(err));
            }
        }
        pending
    }

    /// Sends `request` and blocks for its response.
    pub fn call(&self, request: RpcRequest) -> CallResult {
        self.go(request).wait()
    }

    fn send(&self, call_id: u64, request: RpcRequest) -> Result<(), ClientError> {
        let bytes = RequestEnvelope::new(call_id, request).encode_to_vec()?;
        let mut writer = self.shared.writer.lock();
        write_frame(&mut *writer, &bytes)?;
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let _ = self.shared.writer.lock().shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn read_responses(mut reader: BufReader<TcpStream>, shared: &ClientShared) {
    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                log::debug!("RPC client read failed: {}", err);
                break;
            }
        };
        let envelope = match ResponseEnvelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("Dropping undecodable response: {}", err);
                continue;
            }
        };
        let sender = shared.pending.lock().calls.remove(&envelope.call_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(envelope.result.map_err(ClientError::from));
            }
            None => log::warn!("Response for unknown call id {}", envelope.call_id),
        }
    }

    let mut table = shared.pending.lock();
    table.closed = true;
    for (_, sender) in table.calls.drain() {
        let _ = sender.send(Err(ClientError::Disconnected));
    }
}

/// Completion handle for a call issued with [`RpcClient::go`].
#[must_use = "a pending call does nothing unless waited on"]
pub struct PendingCall {
    operation: &'static str,
    receiver: Receiver<CallResult>,
}

impl PendingCall {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn wait(self) -> CallResult {
        self.receiver
            .recv()
            .unwrap_or(Err(ClientError::Disconnected))
    }

    pub fn wait_timeout(self, timeout: Duration) -> CallResult {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout {
                operation: self.operation,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Disconnected),
        }
    }

    pub fn wait_ok(self) -> Result<(), ClientError> {
        let operation = self.operation;
        match self.wait()? {
            RpcResponse::Ok => Ok(()),
            _ => Err(ClientError::UnexpectedResponse { operation }),
        }
    }

    pub fn wait_world_update(self) -> Result<WorldUpdate, ClientError> {
        let operation = self.operation;
        match self.wait()? {
            RpcResponse::WorldUpdate(update) => Ok(update),
            _ => Err(ClientError::UnexpectedResponse { operation }),
        }
    }
}

/// A connected server plus the configurations it offers.
pub struct SimServer {
    name: String,
    client: Arc<RpcClient>,
    configurations: SimConfigurationCatalog,
}

impl SimServer {
    pub fn connect<A: ToSocketAddrs>(name: impl Into<String>, addr: A) -> Result<Self, ClientError> {
        let client = Arc::new(RpcClient::connect(addr)?);
        let configurations = match client.call(RpcRequest::ListConfigurations)? {
            RpcResponse::Configurations(configurations) => configurations,
            _ => {
                return Err(ClientError::UnexpectedResponse {
                    operation: "list_configurations",
                })
            }
        };
        Ok(Self {
            name: name.into(),
            client,
            configurations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configurations(&self) -> &SimConfigurationCatalog {
        &self.configurations
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    pub fn list_active_sims(&self) -> Result<BTreeMap<String, RemoteSim>, ClientError> {
        match self.client.call(RpcRequest::ListActiveSims)? {
            RpcResponse::ActiveSims(sims) => Ok(sims),
            _ => Err(ClientError::UnexpectedResponse {
                operation: "list_active_sims",
            }),
        }
    }

    /// Creates or joins a sim and returns a proxy bound to the new token.
    pub fn new_sim(&self, config: NewSimConfiguration) -> Result<(World, SimProxy), ClientError> {
        match self.client.call(RpcRequest::NewSim(config))? {
            RpcResponse::NewSim(result) => Ok((
                result.world,
                SimProxy::new(Arc::clone(&self.client), result.token),
            )),
            _ => Err(ClientError::UnexpectedResponse { operation: "new_sim" }),
        }
    }
}

/// Client-side handle for one signed-on controller.
///
/// Session calls block; per-aircraft and polling calls return a
/// [`PendingCall`].
pub struct SimProxy {
    client: Arc<RpcClient>,
    token: ControllerToken,
}

impl SimProxy {
    pub fn new(client: Arc<RpcClient>, token: ControllerToken) -> Self {
        Self { client, token }
    }

    pub fn token(&self) -> &ControllerToken {
        &self.token
    }

    fn aircraft(&self, callsign: &str) -> AircraftSpecifier {
        AircraftSpecifier::new(self.token.clone(), callsign)
    }

    pub fn sign_off(&self) -> Result<(), ClientError> {
        self.client
            .go(RpcRequest::SignOff {
                token: self.token.clone(),
            })
            .wait_ok()
    }

    /// Moves to `callsign`; the proxy switches to the reissued token.
    pub fn change_control_position(
        &mut self,
        callsign: &str,
        keep_tracks: bool,
    ) -> Result<(), ClientError> {
        let response = self.client.call(RpcRequest::ChangeControlPosition {
            token: self.token.clone(),
            callsign: callsign.to_string(),
            keep_tracks,
        })?;
        match response {
            RpcResponse::ControlPosition { token } => {
                self.token = token;
                Ok(())
            }
            _ => Err(ClientError::UnexpectedResponse {
                operation: "change_control_position",
            }),
        }
    }

    pub fn serialize_sim(&self) -> Result<SimSnapshot, ClientError> {
        match self.client.call(RpcRequest::SerializeSim {
            token: self.token.clone(),
        })? {
            RpcResponse::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(ClientError::UnexpectedResponse {
                operation: "serialize_sim",
            }),
        }
    }

    pub fn get_world_update(&self) -> PendingCall {
        self.client.go(RpcRequest::GetWorldUpdate {
            token: self.token.clone(),
        })
    }

    pub fn toggle_pause(&self) -> PendingCall {
        self.client.go(RpcRequest::TogglePause {
            token: self.token.clone(),
        })
    }

    pub fn set_sim_rate(&self, rate: f32) -> PendingCall {
        self.client.go(RpcRequest::SetSimRate {
            token: self.token.clone(),
            rate,
        })
    }

    pub fn take_or_return_launch_control(&self) -> PendingCall {
        self.client.go(RpcRequest::TakeOrReturnLaunchControl {
            token: self.token.clone(),
        })
    }

    pub fn launch_aircraft(&self, aircraft: Aircraft) -> PendingCall {
        self.client.go(RpcRequest::LaunchAircraft {
            token: self.token.clone(),
            aircraft,
        })
    }

    pub fn initiate_track(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::InitiateTrack(self.aircraft(callsign)))
    }

    pub fn drop_track(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::DropTrack(self.aircraft(callsign)))
    }

    pub fn handoff_track(&self, callsign: &str, controller: &str) -> PendingCall {
        self.client.go(RpcRequest::HandoffTrack {
            aircraft: self.aircraft(callsign),
            controller: controller.to_string(),
        })
    }

    pub fn accept_handoff(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::AcceptHandoff(self.aircraft(callsign)))
    }

    pub fn reject_handoff(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::RejectHandoff(self.aircraft(callsign)))
    }

    pub fn cancel_handoff(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::CancelHandoff(self.aircraft(callsign)))
    }

    pub fn handoff_control(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::HandoffControl(self.aircraft(callsign)))
    }

    pub fn point_out(&self, callsign: &str, controller: &str) -> PendingCall {
        self.client.go(RpcRequest::PointOut {
            aircraft: self.aircraft(callsign),
            controller: controller.to_string(),
        })
    }

    pub fn set_scratchpad(&self, callsign: &str, scratchpad: &str) -> PendingCall {
        self.client.go(RpcRequest::SetScratchpad {
            aircraft: self.aircraft(callsign),
            scratchpad: scratchpad.to_string(),
        })
    }

    pub fn assign_altitude(&self, callsign: &str, altitude: i32) -> PendingCall {
        self.client.go(RpcRequest::AssignAltitude {
            aircraft: self.aircraft(callsign),
            altitude,
        })
    }

    pub fn set_temporary_altitude(&self, callsign: &str, altitude: i32) -> PendingCall {
        self.client.go(RpcRequest::SetTemporaryAltitude {
            aircraft: self.aircraft(callsign),
            altitude,
        })
    }

    pub fn assign_heading(&self, callsign: &str, heading: HeadingAssignment) -> PendingCall {
        self.client.go(RpcRequest::AssignHeading {
            aircraft: self.aircraft(callsign),
            heading,
        })
    }

    pub fn assign_speed(&self, callsign: &str, speed: i32) -> PendingCall {
        self.client.go(RpcRequest::AssignSpeed {
            aircraft: self.aircraft(callsign),
            speed,
        })
    }

    pub fn direct_fix(&self, callsign: &str, fix: &str) -> PendingCall {
        self.client.go(RpcRequest::DirectFix {
            aircraft: self.aircraft(callsign),
            fix: fix.to_string(),
        })
    }

    pub fn depart_fix_heading(&self, callsign: &str, fix: &str, heading: i32) -> PendingCall {
        self.client.go(RpcRequest::DepartFixHeading {
            aircraft: self.aircraft(callsign),
            fix: fix.to_string(),
            heading,
        })
    }

    pub fn cross_fix_at(
        &self,
        callsign: &str,
        fix: &str,
        altitude: Option<i32>,
        speed: Option<i32>,
    ) -> PendingCall {
        self.client.go(RpcRequest::CrossFixAt {
            aircraft: self.aircraft(callsign),
            fix: fix.to_string(),
            altitude,
            speed,
        })
    }

    pub fn expect_approach(&self, callsign: &str, approach: &str) -> PendingCall {
        self.client.go(RpcRequest::ExpectApproach {
            aircraft: self.aircraft(callsign),
            approach: approach.to_string(),
        })
    }

    pub fn cleared_approach(&self, callsign: &str, approach: &str, straight_in: bool) -> PendingCall {
        self.client.go(RpcRequest::ClearedApproach {
            aircraft: self.aircraft(callsign),
            approach: approach.to_string(),
            straight_in,
        })
    }

    pub fn go_around(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::GoAround(self.aircraft(callsign)))
    }

    pub fn delete_aircraft(&self, callsign: &str) -> PendingCall {
        self.client.go(RpcRequest::DeleteAircraft(self.aircraft(callsign)))
    }

    pub fn run_aircraft_commands(&self, callsign: &str, commands: &str) -> PendingCall {
        self.client.go(RpcRequest::RunAircraftCommands {
            aircraft: self.aircraft(callsign),
            commands: commands.to_string(),
        })
    }
}

/// An in-process server on an ephemeral loopback port, with a connected client.
pub struct LocalSimServer {
    server: SimServer,
    rpc: RpcServer,
    manager: Arc<SimManager>,
}

impl LocalSimServer {
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    pub fn addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    pub fn manager(&self) -> &Arc<SimManager> {
        &self.manager
    }

    pub fn shutdown(self) {
        let LocalSimServer {
            server,
            mut rpc,
            manager,
        } = self;
        drop(server);
        rpc.shutdown();
        manager.shutdown();
    }
}

pub fn launch_local_server(
    catalog: SimConfigurationCatalog,
    config: &ServerConfig,
) -> Result<LocalSimServer, ClientError> {
    let manager = Arc::new(SimManager::new(catalog, config));
    let dispatcher = SimDispatcher::new(Arc::clone(&manager));
    let rpc = start_rpc_server(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), dispatcher)?;
    let server = SimServer::connect("Local (Single controller)", rpc.local_addr())?;
    Ok(LocalSimServer {
        server,
        rpc,
        manager,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_catalog;

    #[test]
    fn wait_timeout_names_the_operation() {
        let (_sender, receiver) = bounded(1);
        let pending = PendingCall {
            operation: "get_world_update",
            receiver,
        };
        assert!(matches!(
            pending.wait_timeout(Duration::from_millis(10)),
            Err(ClientError::Timeout {
                operation: "get_world_update"
            })
        ));
    }

    #[test]
    fn local_server_round_trip() {
        let local = launch_local_server(builtin_catalog().expect("catalog"), &ServerConfig::default())
            .expect("launch");
        assert!(local.server().configurations().contains_key("JFK"));

        let (world, proxy) = local
            .server()
            .new_sim(NewSimConfiguration::create_local("JFK"))
            .expect("new sim");
        assert!(world.controllers.contains("JFK_APP"));

        let pending = proxy.get_world_update();
        let update = pending.wait_world_update().expect("update");
        assert!(update.aircraft.contains_key("AAL123"));

        proxy.sign_off().expect("sign off");
        let err = proxy.toggle_pause().wait_ok().expect_err("stale token");
        assert_eq!(err.sim_error(), Some(&SimError::NoSimForToken));
        local.shutdown();
    }

    #[test]
    fn calls_after_disconnect_fail_fast() {
        let local = launch_local_server(builtin_catalog().expect("catalog"), &ServerConfig::default())
            .expect("launch");
        let client = RpcClient::connect(local.addr()).expect("connect");
        {
            let mut table = client.shared.pending.lock();
            table.closed = true;
        }
        assert!(matches!(
            client.call(RpcRequest::ListActiveSims),
            Err(ClientError::Disconnected)
        ));
        local.shutdown();
    }
}
