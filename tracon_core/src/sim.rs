//! One running simulation instance.
//!
//! All state sits behind a single mutex. The update loop is the only code that
//! moves aircraft; every remote operation takes the same lock briefly, checks
//! the caller's session and authority, then mutates assignments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};
use tracon_runtime::{
    normalize_heading, run_aircraft_commands, Aircraft, AircraftSpecifier, ApproachClearance,
    ClearanceSink, ControllerToken, CrossFix, DepartFix, HeadingAssignment, ParsedCommand,
    RemoteSim, SimConfiguration, SimError, SimSnapshot, SnapshotHeader, TurnMethod, World,
    WorldUpdate,
};

use crate::tokens::generate_token;

pub const TURN_RATE_DEG_PER_SEC: f32 = 3.0;
pub const CLIMB_RATE_FT_PER_MIN: f32 = 2000.0;
pub const ACCELERATION_KT_PER_SEC: f32 = 2.0;
pub const FIX_CAPTURE_NM: f32 = 0.5;

pub const MAX_ALTITUDE_FT: i32 = 60_000;
pub const MIN_SPEED_KT: i32 = 50;
pub const MAX_SPEED_KT: i32 = 600;
pub const MAX_SIM_RATE: f32 = 100.0;

pub struct Sim {
    name: String,
    configuration: String,
    description: String,
    active: AtomicBool,
    state: Mutex<SimState>,
}

struct SimState {
    world: World,
    /// Live sessions, token to controller position.
    sessions: HashMap<ControllerToken, String>,
    paused: bool,
    sim_rate: f32,
    launch_controller: Option<String>,
    tick: u64,
    sim_time_secs: f64,
    last_update: Option<Instant>,
}

impl Sim {
    /// Builds an instance from a configuration and places its initial aircraft.
    pub fn new(
        name: impl Into<String>,
        configuration_name: impl Into<String>,
        config: &SimConfiguration,
    ) -> Self {
        let mut world = World::from_configuration(config);
        for spawn in &config.spawns {
            world
                .aircraft
                .insert(spawn.callsign.clone(), Aircraft::from_spawn(spawn));
        }

        Self {
            name: name.into(),
            configuration: configuration_name.into(),
            description: config.description.clone(),
            active: AtomicBool::new(false),
            state: Mutex::new(SimState {
                world,
                sessions: HashMap::new(),
                paused: false,
                sim_rate: 1.0,
                launch_controller: None,
                tick: 0,
                sim_time_secs: 0.0,
                last_update: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_controller(&self) -> String {
        self.state.lock().world.primary_controller.clone()
    }

    pub fn activate(&self) {
        self.state.lock().last_update = None;
        self.active.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Takes `callsign` and returns the world plus a fresh token.
    ///
    /// The occupancy check and the insert happen under one lock, so two
    /// racing sign-ons for the same position cannot both succeed.
    pub fn sign_on(&self, callsign: &str) -> Result<(World, ControllerToken), SimError> {
        let mut state = self.state.lock();
        if !state.world.has_position(callsign) {
            return Err(SimError::NoController(callsign.to_string()));
        }
        if state.world.controllers.contains(callsign) {
            return Err(SimError::PositionOccupied(callsign.to_string()));
        }

        let token = generate_token();
        state.sessions.insert(token.clone(), callsign.to_string());
        state.world.controllers.insert(callsign.to_string());
        info!(
            target: "tracon::sim",
            sim = %self.name,
            callsign,
            token = %token,
            "controller.signed_on"
        );
        Ok((state.world.clone(), token))
    }

    /// Ends the session; the position's tracks and launch control are released.
    pub fn sign_off(&self, token: &ControllerToken) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let callsign = state
            .sessions
            .remove(token)
            .ok_or(SimError::UnknownToken)?;
        state.vacate_position(&callsign, None);
        info!(
            target: "tracon::sim",
            sim = %self.name,
            callsign = %callsign,
            "controller.signed_off"
        );
        Ok(())
    }

    /// Moves the session to another position and returns its new token.
    ///
    /// With `keep_tracks` the tracks, radio control and launch control held
    /// at the old position follow the controller; otherwise they are released.
    pub fn change_control_position(
        &self,
        token: &ControllerToken,
        callsign: &str,
        keep_tracks: bool,
    ) -> Result<ControllerToken, SimError> {
        let mut state = self.state.lock();
        let previous = state.controller_for(token)?;
        if !state.world.has_position(callsign) {
            return Err(SimError::NoController(callsign.to_string()));
        }
        if callsign != previous && state.world.controllers.contains(callsign) {
            return Err(SimError::PositionOccupied(callsign.to_string()));
        }

        let new_token = generate_token();
        state.sessions.remove(token);
        state
            .sessions
            .insert(new_token.clone(), callsign.to_string());
        state.vacate_position(&previous, keep_tracks.then_some(callsign));
        state.world.controllers.insert(callsign.to_string());

        info!(
            target: "tracon::sim",
            sim = %self.name,
            from = %previous,
            to = callsign,
            keep_tracks,
            "controller.position_changed"
        );
        Ok(new_token)
    }

    pub fn get_world_update(&self, token: &ControllerToken) -> Result<WorldUpdate, SimError> {
        let state = self.state.lock();
        state.controller_for(token)?;
        Ok(WorldUpdate {
            tick: state.tick,
            sim_time_secs: state.sim_time_secs,
            paused: state.paused,
            sim_rate: state.sim_rate,
            launch_controller: state.launch_controller.clone(),
            controllers: state.world.controllers.clone(),
            aircraft: state.world.aircraft.clone(),
        })
    }

    pub fn toggle_pause(&self, token: &ControllerToken) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(token)?;
        state.paused = !state.paused;
        // Avoid a catch-up jump when resuming.
        state.last_update = None;
        info!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            paused = state.paused,
            "sim.pause_toggled"
        );
        Ok(())
    }

    pub fn set_sim_rate(&self, token: &ControllerToken, rate: f32) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(token)?;
        if !rate.is_finite() || rate <= 0.0 || rate > MAX_SIM_RATE {
            return Err(SimError::InvalidSimRate(rate));
        }
        state.sim_rate = rate;
        info!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            rate,
            "sim.rate_changed"
        );
        Ok(())
    }

    pub fn take_or_return_launch_control(&self, token: &ControllerToken) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(token)?;
        let holder = state.launch_controller.clone();
        state.launch_controller = match holder {
            None => Some(controller.clone()),
            Some(holder) if holder == controller => None,
            Some(holder) => return Err(SimError::LaunchControlHeld(holder)),
        };
        debug!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            held = state.launch_controller.is_some(),
            "launch_control.changed"
        );
        Ok(())
    }

    pub fn launch_aircraft(
        &self,
        token: &ControllerToken,
        mut aircraft: Aircraft,
    ) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(token)?;
        if let Some(holder) = &state.launch_controller {
            if *holder != controller {
                return Err(SimError::LaunchControlHeld(holder.clone()));
            }
        }
        if aircraft.callsign.is_empty() {
            return Err(SimError::MalformedRequest(
                "aircraft callsign is empty".to_string(),
            ));
        }
        if state.world.aircraft.contains_key(&aircraft.callsign) {
            return Err(SimError::DuplicateCallsign(aircraft.callsign));
        }

        aircraft.heading = normalize_heading(aircraft.heading);
        info!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            callsign = %aircraft.callsign,
            "aircraft.launched"
        );
        state
            .world
            .aircraft
            .insert(aircraft.callsign.clone(), aircraft);
        Ok(())
    }

    pub fn initiate_track(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            if aircraft.tracking_controller.is_some() {
                return Err(SimError::OtherControllerHasTrack(aircraft.callsign.clone()));
            }
            aircraft.tracking_controller = Some(me.to_string());
            aircraft.controlling_controller = Some(me.to_string());
            Ok(())
        })
    }

    pub fn drop_track(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            require_tracked_by(aircraft, me)?;
            aircraft.tracking_controller = None;
            if aircraft.is_controlled_by(me) {
                aircraft.controlling_controller = None;
            }
            aircraft.handoff_target = None;
            aircraft.point_out_target = None;
            Ok(())
        })
    }

    pub fn handoff_track(&self, spec: &AircraftSpecifier, target: &str) -> Result<(), SimError> {
        self.with_aircraft(spec, |world, me, aircraft| {
            require_tracked_by(aircraft, me)?;
            validate_target(world, me, target)?;
            aircraft.handoff_target = Some(target.to_string());
            Ok(())
        })
    }

    pub fn accept_handoff(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            if aircraft.handoff_target.as_deref() != Some(me) {
                return Err(SimError::NotBeingHandedOffToMe(aircraft.callsign.clone()));
            }
            aircraft.handoff_target = None;
            aircraft.tracking_controller = Some(me.to_string());
            Ok(())
        })
    }

    pub fn reject_handoff(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            if aircraft.handoff_target.as_deref() != Some(me) {
                return Err(SimError::NotBeingHandedOffToMe(aircraft.callsign.clone()));
            }
            aircraft.handoff_target = None;
            Ok(())
        })
    }

    pub fn cancel_handoff(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            require_tracked_by(aircraft, me)?;
            if aircraft.handoff_target.take().is_none() {
                return Err(SimError::NoHandoffInProgress(aircraft.callsign.clone()));
            }
            Ok(())
        })
    }

    /// Hands radio control to whoever now holds the track.
    pub fn handoff_control(&self, spec: &AircraftSpecifier) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            if !aircraft.is_controlled_by(me) {
                return Err(SimError::NotTrackedByMe(aircraft.callsign.clone()));
            }
            match aircraft.tracking_controller.clone() {
                Some(tracker) if tracker != me => {
                    aircraft.controlling_controller = Some(tracker);
                    Ok(())
                }
                _ => Err(SimError::InvalidHandoffTarget(aircraft.callsign.clone())),
            }
        })
    }

    pub fn point_out(&self, spec: &AircraftSpecifier, target: &str) -> Result<(), SimError> {
        self.with_aircraft(spec, |world, me, aircraft| {
            require_tracked_by(aircraft, me)?;
            validate_target(world, me, target)?;
            aircraft.point_out_target = Some(target.to_string());
            Ok(())
        })
    }

    pub fn set_scratchpad(&self, spec: &AircraftSpecifier, scratchpad: &str) -> Result<(), SimError> {
        self.with_aircraft(spec, |_, me, aircraft| {
            require_tracked_by(aircraft, me)?;
            aircraft.scratchpad = scratchpad.to_string();
            Ok(())
        })
    }

    /// Applies a single typed clearance.
    pub fn issue_clearance(
        &self,
        spec: &AircraftSpecifier,
        command: ParsedCommand,
    ) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(&spec.token)?;
        let mut commander = AircraftCommander {
            world: &mut state.world,
            controller: &controller,
            callsign: &spec.callsign,
        };
        commander.apply(command)?;
        debug!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            callsign = %spec.callsign,
            "clearance.applied"
        );
        Ok(())
    }

    /// Runs a shorthand command string against one aircraft.
    ///
    /// Clearances that executed before a failure are kept.
    pub fn run_aircraft_commands(
        &self,
        spec: &AircraftSpecifier,
        commands: &str,
    ) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(&spec.token)?;
        if !state.world.aircraft.contains_key(&spec.callsign) {
            return Err(SimError::NoAircraft(spec.callsign.clone()));
        }
        let mut commander = AircraftCommander {
            world: &mut state.world,
            controller: &controller,
            callsign: &spec.callsign,
        };
        let result = run_aircraft_commands(commands, &mut commander);
        debug!(
            target: "tracon::sim",
            sim = %self.name,
            controller = %controller,
            callsign = %spec.callsign,
            commands,
            ok = result.is_ok(),
            "commands.executed"
        );
        result
    }

    /// Deep copy of the instance with a content digest in the header.
    pub fn snapshot(&self) -> Result<SimSnapshot, SimError> {
        let state = self.state.lock();
        let snapshot = SimSnapshot {
            header: SnapshotHeader::new(
                state.tick,
                state.world.aircraft.len(),
                state.world.controllers.len(),
            ),
            name: self.name.clone(),
            configuration: self.configuration.clone(),
            sim_time_secs: state.sim_time_secs,
            paused: state.paused,
            sim_rate: state.sim_rate,
            launch_controller: state.launch_controller.clone(),
            world: state.world.clone(),
        };
        drop(state);
        snapshot
            .finalize()
            .map_err(|err| SimError::MalformedRequest(format!("snapshot encoding failed: {err}")))
    }

    /// Discovery entry: configured positions nobody is signed on at.
    pub fn remote_sim(&self) -> RemoteSim {
        let state = self.state.lock();
        let available_positions = state
            .world
            .positions()
            .into_iter()
            .filter(|position| !state.world.controllers.contains(position))
            .collect();
        RemoteSim {
            configuration: self.configuration.clone(),
            description: self.description.clone(),
            available_positions,
        }
    }

    /// One real-time update step driven by the background loop.
    pub fn update(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let elapsed = state
            .last_update
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        state.last_update = Some(now);
        if state.paused || elapsed <= 0.0 {
            return;
        }
        let dt = elapsed * state.sim_rate;
        state.advance(dt);
    }

    /// Advances simulated time by `dt_secs` regardless of wall time or rate.
    /// Does nothing while paused.
    pub fn step(&self, dt_secs: f32) {
        let mut state = self.state.lock();
        if !state.paused {
            state.advance(dt_secs);
        }
    }

    fn with_aircraft<R>(
        &self,
        spec: &AircraftSpecifier,
        f: impl FnOnce(&World, &str, &mut Aircraft) -> Result<R, SimError>,
    ) -> Result<R, SimError> {
        let mut state = self.state.lock();
        let controller = state.controller_for(&spec.token)?;
        let world = &mut state.world;
        let mut aircraft = world
            .aircraft
            .remove(&spec.callsign)
            .ok_or_else(|| SimError::NoAircraft(spec.callsign.clone()))?;
        let result = f(world, &controller, &mut aircraft);
        world.aircraft.insert(spec.callsign.clone(), aircraft);
        result
    }
}

impl SimState {
    fn controller_for(&self, token: &ControllerToken) -> Result<String, SimError> {
        self.sessions
            .get(token)
            .cloned()
            .ok_or(SimError::UnknownToken)
    }

    /// Frees `position`. With a successor everything it held moves there;
    /// without one tracks, pending handoffs and launch control are released.
    fn vacate_position(&mut self, position: &str, successor: Option<&str>) {
        self.world.controllers.remove(position);
        let successor = successor.map(str::to_string);
        if self.launch_controller.as_deref() == Some(position) {
            self.launch_controller = successor.clone();
        }
        for aircraft in self.world.aircraft.values_mut() {
            if aircraft.handoff_target.as_deref() == Some(position) {
                aircraft.handoff_target = None;
            }
            if aircraft.point_out_target.as_deref() == Some(position) {
                aircraft.point_out_target = None;
            }
            if aircraft.is_tracked_by(position) {
                aircraft.tracking_controller = successor.clone();
                if successor.is_none() {
                    aircraft.handoff_target = None;
                }
            }
            if aircraft.is_controlled_by(position) {
                aircraft.controlling_controller = successor.clone();
            }
        }
    }

    fn advance(&mut self, dt_secs: f32) {
        self.tick += 1;
        self.sim_time_secs += f64::from(dt_secs);
        let world = &mut self.world;
        for aircraft in world.aircraft.values_mut() {
            advance_aircraft(aircraft, &world.locations, dt_secs);
        }
    }
}

fn require_tracked_by(aircraft: &Aircraft, controller: &str) -> Result<(), SimError> {
    if aircraft.is_tracked_by(controller) {
        Ok(())
    } else {
        Err(SimError::NotTrackedByMe(aircraft.callsign.clone()))
    }
}

fn validate_target(world: &World, me: &str, target: &str) -> Result<(), SimError> {
    if !world.has_position(target) {
        return Err(SimError::NoController(target.to_string()));
    }
    if target == me {
        return Err(SimError::InvalidHandoffTarget(target.to_string()));
    }
    Ok(())
}

fn validate_altitude(altitude: i32) -> Result<(), SimError> {
    if (0..=MAX_ALTITUDE_FT).contains(&altitude) {
        Ok(())
    } else {
        Err(SimError::InvalidAltitude(altitude))
    }
}

fn validate_heading(heading: i32) -> Result<(), SimError> {
    if (1..=360).contains(&heading) {
        Ok(())
    } else {
        Err(SimError::InvalidHeading(heading))
    }
}

fn validate_speed(speed: i32) -> Result<(), SimError> {
    if (MIN_SPEED_KT..=MAX_SPEED_KT).contains(&speed) {
        Ok(())
    } else {
        Err(SimError::InvalidSpeed(speed))
    }
}

/// Applies clearances for one controller to one aircraft.
struct AircraftCommander<'a> {
    world: &'a mut World,
    controller: &'a str,
    callsign: &'a str,
}

impl AircraftCommander<'_> {
    fn check_control(&self) -> Result<(), SimError> {
        let aircraft = self
            .world
            .aircraft
            .get(self.callsign)
            .ok_or_else(|| SimError::NoAircraft(self.callsign.to_string()))?;
        match aircraft.controlling_controller.as_deref() {
            Some(controller) if controller == self.controller => Ok(()),
            Some(_) => Err(SimError::OtherControllerHasTrack(self.callsign.to_string())),
            None => Err(SimError::NotTrackedByMe(self.callsign.to_string())),
        }
    }

    fn aircraft(&mut self) -> Result<&mut Aircraft, SimError> {
        let callsign = self.callsign;
        self.world
            .aircraft
            .get_mut(callsign)
            .ok_or_else(|| SimError::NoAircraft(callsign.to_string()))
    }

    fn require_fix(&self, fix: &str) -> Result<(), SimError> {
        if self.world.locations.contains_key(fix) {
            Ok(())
        } else {
            Err(SimError::UnknownFix(fix.to_string()))
        }
    }

    fn assign_heading(&mut self, assignment: HeadingAssignment) -> Result<(), SimError> {
        let aircraft = self.aircraft()?;
        let (heading, turn) = match assignment {
            HeadingAssignment::Present => (aircraft.heading, TurnMethod::Closest),
            HeadingAssignment::Heading { heading, turn } => {
                validate_heading(heading)?;
                (normalize_heading(heading as f32), turn)
            }
            HeadingAssignment::LeftDegrees(degrees) => {
                if !(1..360).contains(&degrees) {
                    return Err(SimError::InvalidHeading(degrees));
                }
                (
                    normalize_heading(aircraft.heading - degrees as f32),
                    TurnMethod::Left,
                )
            }
            HeadingAssignment::RightDegrees(degrees) => {
                if !(1..360).contains(&degrees) {
                    return Err(SimError::InvalidHeading(degrees));
                }
                (
                    normalize_heading(aircraft.heading + degrees as f32),
                    TurnMethod::Right,
                )
            }
        };
        aircraft.nav.clear_lateral();
        aircraft.nav.assigned_heading = Some(heading);
        aircraft.nav.turn = turn;
        Ok(())
    }
}

impl ClearanceSink for AircraftCommander<'_> {
    fn is_known_fix(&self, fix: &str) -> bool {
        self.world.locations.contains_key(fix)
    }

    fn apply(&mut self, command: ParsedCommand) -> Result<(), SimError> {
        if command == ParsedCommand::DeleteAircraft {
            return self
                .world
                .aircraft
                .remove(self.callsign)
                .map(|_| ())
                .ok_or_else(|| SimError::NoAircraft(self.callsign.to_string()));
        }
        self.check_control()?;

        match command {
            ParsedCommand::AssignHeading(assignment) => self.assign_heading(assignment)?,
            ParsedCommand::AssignAltitude { altitude } => {
                validate_altitude(altitude)?;
                let aircraft = self.aircraft()?;
                aircraft.nav.assigned_altitude = Some(altitude);
                aircraft.nav.temporary_altitude = None;
            }
            ParsedCommand::AssignTemporaryAltitude { altitude } => {
                validate_altitude(altitude)?;
                self.aircraft()?.nav.temporary_altitude = Some(altitude);
            }
            ParsedCommand::AssignSpeed { speed } => {
                if speed != 0 {
                    validate_speed(speed)?;
                }
                self.aircraft()?.nav.assigned_speed = (speed != 0).then_some(speed);
            }
            ParsedCommand::DirectToFix { fix } => {
                self.require_fix(&fix)?;
                let aircraft = self.aircraft()?;
                aircraft.nav.clear_lateral();
                aircraft.nav.direct_fix = Some(fix);
            }
            ParsedCommand::DepartFixOnHeading { fix, heading } => {
                // An empty fix means the fix the aircraft is already proceeding to.
                let fix = if fix.is_empty() {
                    self.aircraft()?.nav.direct_fix.clone().unwrap_or_default()
                } else {
                    fix
                };
                self.require_fix(&fix)?;
                validate_heading(heading)?;
                self.aircraft()?.nav.depart_fix = Some(DepartFix { fix, heading });
            }
            ParsedCommand::CrossFixAt {
                fix,
                altitude,
                speed,
            } => {
                self.require_fix(&fix)?;
                if let Some(altitude) = altitude {
                    validate_altitude(altitude)?;
                }
                if let Some(speed) = speed {
                    validate_speed(speed)?;
                }
                self.aircraft()?.nav.cross_fix = Some(CrossFix {
                    fix,
                    altitude,
                    speed,
                });
            }
            ParsedCommand::ExpectApproach { approach } => {
                if !self.world.approaches.contains_key(&approach) {
                    return Err(SimError::UnknownApproach(approach));
                }
                self.aircraft()?.nav.expected_approach = Some(approach);
            }
            ParsedCommand::ClearedApproach {
                approach,
                straight_in,
            } => {
                let final_fix = self
                    .world
                    .approaches
                    .get(&approach)
                    .map(|details| details.final_fix.clone())
                    .ok_or_else(|| SimError::UnknownApproach(approach.clone()))?;
                let fix_known = self.is_known_fix(&final_fix);
                let aircraft = self.aircraft()?;
                aircraft.nav.clear_lateral();
                if fix_known {
                    aircraft.nav.direct_fix = Some(final_fix);
                }
                aircraft.nav.expected_approach = Some(approach.clone());
                aircraft.nav.cleared_approach = Some(ApproachClearance {
                    approach,
                    straight_in,
                });
            }
            ParsedCommand::GoAround => {
                let aircraft = self.aircraft()?;
                aircraft.nav.cleared_approach = None;
                aircraft.nav.clear_lateral();
                aircraft.nav.assigned_heading = Some(aircraft.heading);
            }
            ParsedCommand::DeleteAircraft => {}
        }
        Ok(())
    }
}

fn advance_aircraft(
    aircraft: &mut Aircraft,
    locations: &std::collections::BTreeMap<String, tracon_runtime::Point>,
    dt_secs: f32,
) {
    // Lateral guidance: a direct fix wins over an assigned heading.
    let mut target_heading = aircraft.nav.assigned_heading;
    if let Some(fix) = aircraft.nav.direct_fix.clone() {
        if let Some(point) = locations.get(&fix) {
            if aircraft.position.distance_to(point) <= FIX_CAPTURE_NM {
                aircraft.nav.direct_fix = None;
                let heading = match aircraft.nav.depart_fix.take() {
                    Some(depart) if depart.fix == fix => depart.heading as f32,
                    other => {
                        aircraft.nav.depart_fix = other;
                        aircraft.heading
                    }
                };
                aircraft.nav.assigned_heading = Some(normalize_heading(heading));
                aircraft.nav.turn = TurnMethod::Closest;
                target_heading = aircraft.nav.assigned_heading;
            } else {
                target_heading = Some(aircraft.position.bearing_to(point));
                aircraft.nav.turn = TurnMethod::Closest;
            }
        }
    }
    if let Some(target) = target_heading {
        aircraft.heading = turn_toward(
            aircraft.heading,
            target,
            aircraft.nav.turn,
            TURN_RATE_DEG_PER_SEC * dt_secs,
        );
    }

    if let Some(cross) = aircraft.nav.cross_fix.clone() {
        if let Some(point) = locations.get(&cross.fix) {
            if aircraft.position.distance_to(point) <= FIX_CAPTURE_NM {
                // Once crossed, the restriction becomes a plain assignment.
                if cross.altitude.is_some() {
                    aircraft.nav.assigned_altitude = cross.altitude;
                }
                if cross.speed.is_some() {
                    aircraft.nav.assigned_speed = cross.speed;
                }
                aircraft.nav.cross_fix = None;
            }
        }
    }

    if let Some(target) = aircraft.nav.target_altitude() {
        aircraft.altitude = approach_value(
            aircraft.altitude,
            target as f32,
            CLIMB_RATE_FT_PER_MIN / 60.0 * dt_secs,
        );
    }
    if let Some(target) = aircraft.nav.target_speed() {
        aircraft.ias = approach_value(
            aircraft.ias,
            target as f32,
            ACCELERATION_KT_PER_SEC * dt_secs,
        );
    }

    let distance_nm = aircraft.ias * dt_secs / 3600.0;
    aircraft.position = aircraft.position.offset(aircraft.heading, distance_nm);
}

fn approach_value(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else if target > current {
        current + max_delta
    } else {
        current - max_delta
    }
}

/// Turns from `current` toward `target` by at most `max_delta` degrees.
fn turn_toward(current: f32, target: f32, turn: TurnMethod, max_delta: f32) -> f32 {
    let right = normalize_heading(target - current);
    if right == 0.0 {
        return target;
    }
    let (sign, amount) = match turn {
        TurnMethod::Closest if right <= 180.0 => (1.0, right),
        TurnMethod::Closest => (-1.0, 360.0 - right),
        TurnMethod::Right => (1.0, right),
        TurnMethod::Left => (-1.0, 360.0 - right),
    };
    if amount <= max_delta {
        target
    } else {
        normalize_heading(current + sign * max_delta)
    }
}
