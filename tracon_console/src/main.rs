use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{info, warn};
use tracon_core::{PendingCall, SimProxy, SimServer};
use tracon_runtime::{encode_snapshot_json, NewSimConfiguration, RpcResponse, WorldUpdate};

mod app;
mod ui;

use app::{ConsoleCommand, ScopeApp};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = String::from_utf8(buf.to_vec()) {
            let _ = self.sender.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "TRACON controller scope", long_about = None)]
struct Cli {
    /// Address of the TRACON RPC server.
    #[arg(long, default_value = "127.0.0.1:8000")]
    server: String,
    /// Sim instance to create or join.
    #[arg(long, default_value = "")]
    sim: String,
    /// Scenario to start a new instance from.
    #[arg(long, conflicts_with = "position")]
    configuration: Option<String>,
    /// Controller position to sign on to an existing instance.
    #[arg(long)]
    position: Option<String>,
    /// Print the scenario catalog and joinable instances, then exit.
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn new_sim(&self) -> Result<NewSimConfiguration> {
        match (&self.configuration, &self.position) {
            (Some(configuration), None) if self.sim.is_empty() => {
                Ok(NewSimConfiguration::create_local(configuration.clone()))
            }
            (Some(configuration), None) => Ok(NewSimConfiguration::create_remote(
                self.sim.clone(),
                configuration.clone(),
            )),
            (None, Some(position)) if !self.sim.is_empty() => {
                Ok(NewSimConfiguration::join(self.sim.clone(), position.clone()))
            }
            (None, Some(_)) => Err(eyre!("--position needs --sim to name the instance")),
            _ => Err(eyre!("pass --configuration to create or --position to join")),
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let (log_tx, log_rx) = mpsc::channel::<String>();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(move || ChannelWriter {
            sender: log_tx.clone(),
        })
        .init();

    let cli = Cli::parse();
    let server = SimServer::connect(cli.sim.clone(), &cli.server)?;
    if cli.list {
        return print_listing(&server);
    }
    let request = cli.new_sim()?;
    let (world, proxy) = server.new_sim(request)?;
    let position = cli
        .position
        .clone()
        .unwrap_or_else(|| world.primary_controller.clone());
    info!(server = %cli.server, %position, "Signed on");

    let (update_tx, update_rx) = mpsc::channel::<WorldUpdate>();
    let (command_tx, command_rx) = mpsc::channel::<ConsoleCommand>();
    let session = thread::spawn(move || run_session(proxy, command_rx, update_tx));

    let app = ScopeApp::new(position, world, update_rx, command_tx, log_rx)?;
    let result = app.run();
    if session.join().is_err() {
        warn!("Session thread panicked");
    }
    result
}

fn print_listing(server: &SimServer) -> Result<()> {
    println!("Configurations:");
    for (name, config) in server.configurations() {
        println!("  {name:<10} {} (primary {})", config.description, config.primary_controller);
    }
    println!("Active sims:");
    for (name, sim) in server.list_active_sims()? {
        let open: Vec<&str> = sim.available_positions.iter().map(String::as_str).collect();
        println!("  {name:<10} {} [{}]", sim.configuration, open.join(" "));
    }
    Ok(())
}

/// Owns the proxy: executes console commands as they arrive and polls for a
/// world update between them. Signs off once the scope hangs up.
fn run_session(mut proxy: SimProxy, commands: Receiver<ConsoleCommand>, updates: Sender<WorldUpdate>) {
    let mut last_poll: Option<Instant> = None;
    loop {
        let wait = last_poll.map_or(Duration::ZERO, |at| POLL_INTERVAL.saturating_sub(at.elapsed()));
        match commands.recv_timeout(wait) {
            Ok(command) => execute(&mut proxy, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_poll.map_or(true, |at| at.elapsed() >= POLL_INTERVAL) {
            last_poll = Some(Instant::now());
            match proxy.get_world_update().wait_timeout(CALL_TIMEOUT) {
                Ok(RpcResponse::WorldUpdate(update)) => {
                    if updates.send(update).is_err() {
                        break;
                    }
                }
                Ok(other) => warn!("Unexpected world update response: {:?}", other),
                Err(err) => warn!("World update failed: {}", err),
            }
        }
    }
    if let Err(err) = proxy.sign_off() {
        warn!("Sign off failed: {}", err);
    }
}

fn execute(proxy: &mut SimProxy, command: ConsoleCommand) {
    let summary = format!("{command}");
    let outcome = match command {
        ConsoleCommand::Clearance { callsign, commands } => {
            wait(proxy.run_aircraft_commands(&callsign, &commands))
        }
        ConsoleCommand::TogglePause => wait(proxy.toggle_pause()),
        ConsoleCommand::SimRate(rate) => wait(proxy.set_sim_rate(rate)),
        ConsoleCommand::LaunchControl => wait(proxy.take_or_return_launch_control()),
        ConsoleCommand::Track(callsign) => wait(proxy.initiate_track(&callsign)),
        ConsoleCommand::Drop(callsign) => wait(proxy.drop_track(&callsign)),
        ConsoleCommand::Handoff { callsign, position } => {
            wait(proxy.handoff_track(&callsign, &position))
        }
        ConsoleCommand::Accept(callsign) => wait(proxy.accept_handoff(&callsign)),
        ConsoleCommand::Reject(callsign) => wait(proxy.reject_handoff(&callsign)),
        ConsoleCommand::Cancel(callsign) => wait(proxy.cancel_handoff(&callsign)),
        ConsoleCommand::Control(callsign) => wait(proxy.handoff_control(&callsign)),
        ConsoleCommand::PointOut { callsign, position } => {
            wait(proxy.point_out(&callsign, &position))
        }
        ConsoleCommand::Scratchpad { callsign, text } => {
            wait(proxy.set_scratchpad(&callsign, &text))
        }
        ConsoleCommand::Position { callsign, keep_tracks } => proxy
            .change_control_position(&callsign, keep_tracks)
            .map_err(|err| err.to_string()),
        ConsoleCommand::Save(path) => save_snapshot(proxy, &path),
    };
    match outcome {
        Ok(()) => info!("{}", summary),
        Err(err) => warn!("{}: {}", summary, err),
    }
}

fn wait(call: PendingCall) -> std::result::Result<(), String> {
    match call.wait_timeout(CALL_TIMEOUT) {
        Ok(RpcResponse::Ok) => Ok(()),
        Ok(other) => Err(format!("unexpected response {other:?}")),
        Err(err) => Err(err.to_string()),
    }
}

fn save_snapshot(proxy: &SimProxy, path: &str) -> std::result::Result<(), String> {
    let snapshot = proxy.serialize_sim().map_err(|err| err.to_string())?;
    let json = encode_snapshot_json(&snapshot).map_err(|err| err.to_string())?;
    std::fs::write(path, json).map_err(|err| format!("{path}: {err}"))
}
