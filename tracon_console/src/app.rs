use std::fmt;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use tracing::{error, warn};
use tracon_runtime::{World, WorldUpdate};

use crate::ui::{draw_ui, UiState};

pub struct ScopeApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    updates: Receiver<WorldUpdate>,
    command_sender: Sender<ConsoleCommand>,
    log_receiver: Receiver<String>,
}

impl ScopeApp {
    pub fn new(
        position: String,
        world: World,
        updates: Receiver<WorldUpdate>,
        command_sender: Sender<ConsoleCommand>,
        log_receiver: Receiver<String>,
    ) -> Result<Self> {
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        crossterm::terminal::enable_raw_mode()?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(Self {
            terminal,
            ui_state: UiState::new(position, world),
            updates,
            command_sender,
            log_receiver,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw: Option<Instant> = None;

        loop {
            while let Ok(update) = self.updates.try_recv() {
                self.ui_state.push_update(update);
            }

            while let Ok(line) = self.log_receiver.try_recv() {
                self.ui_state.push_log(line);
            }

            if last_draw.map_or(true, |at| at.elapsed() >= Duration::from_millis(100)) {
                self.terminal.draw(|frame| draw_ui(frame, &self.ui_state))?;
                last_draw = Some(Instant::now());
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Esc => break,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            break
                        }
                        KeyCode::Char(c) => self.ui_state.input.push(c),
                        KeyCode::Backspace => {
                            self.ui_state.input.pop();
                        }
                        KeyCode::Enter => {
                            let line = std::mem::take(&mut self.ui_state.input);
                            if !self.submit(&line) {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        crossterm::terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Returns `false` once the operator asks to quit.
    fn submit(&mut self, line: &str) -> bool {
        match parse_line(line) {
            Ok(None) => true,
            Ok(Some(Input::Quit)) => false,
            Ok(Some(Input::Command(command))) => {
                if let ConsoleCommand::Position { callsign, .. } = &command {
                    self.ui_state.position = callsign.clone();
                }
                if let Err(err) = self.command_sender.send(command) {
                    error!("Session closed: {}", err);
                    return false;
                }
                true
            }
            Err(message) => {
                warn!("{}", message);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Quit,
    Command(ConsoleCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Clearance { callsign: String, commands: String },
    TogglePause,
    SimRate(f32),
    LaunchControl,
    Track(String),
    Drop(String),
    Handoff { callsign: String, position: String },
    Accept(String),
    Reject(String),
    Cancel(String),
    Control(String),
    PointOut { callsign: String, position: String },
    Scratchpad { callsign: String, text: String },
    Position { callsign: String, keep_tracks: bool },
    Save(String),
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleCommand::Clearance { callsign, commands } => write!(f, "{callsign} {commands}"),
            ConsoleCommand::TogglePause => f.write_str("pause"),
            ConsoleCommand::SimRate(rate) => write!(f, "rate {rate}"),
            ConsoleCommand::LaunchControl => f.write_str("launch control"),
            ConsoleCommand::Track(callsign) => write!(f, "track {callsign}"),
            ConsoleCommand::Drop(callsign) => write!(f, "drop {callsign}"),
            ConsoleCommand::Handoff { callsign, position } => {
                write!(f, "handoff {callsign} to {position}")
            }
            ConsoleCommand::Accept(callsign) => write!(f, "accept {callsign}"),
            ConsoleCommand::Reject(callsign) => write!(f, "reject {callsign}"),
            ConsoleCommand::Cancel(callsign) => write!(f, "cancel handoff {callsign}"),
            ConsoleCommand::Control(callsign) => write!(f, "transfer control of {callsign}"),
            ConsoleCommand::PointOut { callsign, position } => {
                write!(f, "point out {callsign} to {position}")
            }
            ConsoleCommand::Scratchpad { callsign, text } => {
                write!(f, "scratchpad {callsign} {text:?}")
            }
            ConsoleCommand::Position {
                callsign,
                keep_tracks,
            } => write!(f, "move to {callsign} (keep tracks: {keep_tracks})"),
            ConsoleCommand::Save(path) => write!(f, "save snapshot to {path}"),
        }
    }
}

/// Parses one scope input line.
///
/// `CALLSIGN <shorthand...>` sends clearance shorthand to an aircraft; lines
/// starting with `/` are scope commands. Input is case-insensitive except for
/// `/save` paths. Blank input is ignored.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let upper = line.to_ascii_uppercase();
    let mut words = upper.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let Some(verb) = head.strip_prefix('/') else {
        if args.is_empty() {
            return Err(format!("{head}: no clearance given"));
        }
        return Ok(Some(Input::Command(ConsoleCommand::Clearance {
            callsign: head.to_string(),
            commands: args.join(" "),
        })));
    };

    let one = |name: &str| -> Result<String, String> {
        match args.as_slice() {
            [callsign] => Ok(callsign.to_string()),
            _ => Err(format!("usage: /{name} CALLSIGN")),
        }
    };
    let two = |name: &str| -> Result<(String, String), String> {
        match args.as_slice() {
            [callsign, position] => Ok((callsign.to_string(), position.to_string())),
            _ => Err(format!("usage: /{name} CALLSIGN POSITION")),
        }
    };

    let command = match verb.to_ascii_uppercase().as_str() {
        "Q" | "QUIT" => return Ok(Some(Input::Quit)),
        "P" | "PAUSE" => ConsoleCommand::TogglePause,
        "RATE" => match args.as_slice() {
            [rate] => ConsoleCommand::SimRate(
                rate.parse()
                    .map_err(|_| format!("{rate}: not a sim rate"))?,
            ),
            _ => return Err("usage: /rate FACTOR".to_string()),
        },
        "LAUNCH" => ConsoleCommand::LaunchControl,
        "TRACK" => ConsoleCommand::Track(one("track")?),
        "DROP" => ConsoleCommand::Drop(one("drop")?),
        "ACCEPT" => ConsoleCommand::Accept(one("accept")?),
        "REJECT" => ConsoleCommand::Reject(one("reject")?),
        "CANCEL" => ConsoleCommand::Cancel(one("cancel")?),
        "CONTROL" => ConsoleCommand::Control(one("control")?),
        "HO" | "HANDOFF" => {
            let (callsign, position) = two("handoff")?;
            ConsoleCommand::Handoff { callsign, position }
        }
        "PO" | "POINTOUT" => {
            let (callsign, position) = two("pointout")?;
            ConsoleCommand::PointOut { callsign, position }
        }
        "SP" | "SCRATCHPAD" => match args.split_first() {
            Some((callsign, text)) => ConsoleCommand::Scratchpad {
                callsign: callsign.to_string(),
                text: text.join(" "),
            },
            None => return Err("usage: /sp CALLSIGN [TEXT]".to_string()),
        },
        "POS" | "POSITION" => match args.as_slice() {
            [callsign] => ConsoleCommand::Position {
                callsign: callsign.to_string(),
                keep_tracks: false,
            },
            [callsign, flag] if flag.eq_ignore_ascii_case("KEEP") => ConsoleCommand::Position {
                callsign: callsign.to_string(),
                keep_tracks: true,
            },
            _ => return Err("usage: /pos CALLSIGN [KEEP]".to_string()),
        },
        "SAVE" => match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [_, path] => ConsoleCommand::Save(path.to_string()),
            _ => return Err("usage: /save PATH".to_string()),
        },
        other => return Err(format!("/{other}: unknown scope command")),
    };
    Ok(Some(Input::Command(command)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> ConsoleCommand {
        match parse_line(line) {
            Ok(Some(Input::Command(command))) => command,
            other => panic!("unexpected parse of {line:?}: {other:?}"),
        }
    }

    #[test]
    fn aircraft_lines_carry_shorthand_verbatim() {
        assert_eq!(
            command("AAL123 C080  L20D S210"),
            ConsoleCommand::Clearance {
                callsign: "AAL123".to_string(),
                commands: "C080 L20D S210".to_string(),
            }
        );
        assert!(parse_line("AAL123").is_err());
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn scope_commands() {
        assert_eq!(parse_line("/q"), Ok(Some(Input::Quit)));
        assert_eq!(command("/track ual2"), ConsoleCommand::Track("UAL2".to_string()));
        assert_eq!(command("/RATE 4"), ConsoleCommand::SimRate(4.0));
        assert_eq!(
            command("/HO AAL123 JFK_DEP"),
            ConsoleCommand::Handoff {
                callsign: "AAL123".to_string(),
                position: "JFK_DEP".to_string(),
            }
        );
        assert_eq!(
            command("/POS LGA_APP KEEP"),
            ConsoleCommand::Position {
                callsign: "LGA_APP".to_string(),
                keep_tracks: true,
            }
        );
        assert_eq!(
            command("/SP DAL9"),
            ConsoleCommand::Scratchpad {
                callsign: "DAL9".to_string(),
                text: String::new(),
            }
        );
        assert_eq!(
            command("/save snapshots/east.json"),
            ConsoleCommand::Save("snapshots/east.json".to_string())
        );
        assert!(parse_line("/TRACK").is_err());
        assert!(parse_line("/RATE FAST").is_err());
        assert!(parse_line("/WARP").is_err());
    }
}
