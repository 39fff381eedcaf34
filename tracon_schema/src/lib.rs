use ahash::RandomState;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

/// Opaque credential handed out at sign-on.
///
/// The `Display` impl only shows a short prefix so tokens can be logged
/// without leaking the full secret; use [`ControllerToken::as_str`] for the
/// wire form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerToken(String);

impl ControllerToken {
    const REDACTED_PREFIX: usize = 6;

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(Self::REDACTED_PREFIX).collect();
        format!("{prefix}...")
    }
}

impl fmt::Display for ControllerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ControllerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControllerToken({})", self.redacted())
    }
}

/// Identifies one aircraft on behalf of one signed-on controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AircraftSpecifier {
    pub token: ControllerToken,
    pub callsign: String,
}

impl AircraftSpecifier {
    pub fn new(token: ControllerToken, callsign: impl Into<String>) -> Self {
        Self {
            token,
            callsign: callsign.into(),
        }
    }
}

/// Position on the scenario plane, in nautical miles east (`x`) and north (`y`)
/// of the scenario origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x_nm: f32,
    pub y_nm: f32,
}

impl Point {
    pub fn new(x_nm: f32, y_nm: f32) -> Self {
        Self { x_nm, y_nm }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = other.x_nm - self.x_nm;
        let dy = other.y_nm - self.y_nm;
        (dx * dx + dy * dy).sqrt()
    }

    /// Magnetic-style bearing in degrees, `0` is north and values grow clockwise.
    pub fn bearing_to(&self, other: &Point) -> f32 {
        let dx = other.x_nm - self.x_nm;
        let dy = other.y_nm - self.y_nm;
        normalize_heading(dx.atan2(dy).to_degrees())
    }

    pub fn offset(&self, heading: f32, distance_nm: f32) -> Point {
        let radians = heading.to_radians();
        Point {
            x_nm: self.x_nm + distance_nm * radians.sin(),
            y_nm: self.y_nm + distance_nm * radians.cos(),
        }
    }
}

/// Wraps an arbitrary angle into `[0, 360)`.
pub fn normalize_heading(heading: f32) -> f32 {
    let wrapped = heading % 360.0;
    let wrapped = if wrapped < 0.0 { wrapped + 360.0 } else { wrapped };
    // Tiny negative inputs round up to exactly 360 after the shift.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnMethod {
    #[default]
    Closest,
    Left,
    Right,
}

/// Heading clearance as issued by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingAssignment {
    /// Fly present heading.
    Present,
    Heading { heading: i32, turn: TurnMethod },
    LeftDegrees(i32),
    RightDegrees(i32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FlightPlan {
    pub departure: String,
    pub arrival: String,
    pub route: Vec<String>,
    pub cruise_altitude: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Approach {
    pub description: String,
    pub final_fix: String,
}

/// Aircraft present in the world when a scenario starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AircraftSpawn {
    pub callsign: String,
    #[serde(default)]
    pub aircraft_type: String,
    pub position: Point,
    pub heading: f32,
    pub altitude: f32,
    pub ias: f32,
    #[serde(default)]
    pub flight_plan: FlightPlan,
    /// Controller that owns the track at spawn; untracked when absent.
    #[serde(default)]
    pub controller: Option<String>,
}

/// One launchable scenario from the configuration catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SimConfiguration {
    pub description: String,
    pub primary_controller: String,
    pub multi_controllers: Vec<String>,
    pub locations: BTreeMap<String, Point>,
    pub approaches: BTreeMap<String, Approach>,
    pub spawns: Vec<AircraftSpawn>,
}

impl SimConfiguration {
    /// Every controller position a participant can sign on at.
    pub fn positions(&self) -> BTreeSet<String> {
        let mut positions: BTreeSet<String> = self.multi_controllers.iter().cloned().collect();
        positions.insert(self.primary_controller.clone());
        positions
    }
}

pub type SimConfigurationCatalog = BTreeMap<String, SimConfiguration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartFix {
    pub fix: String,
    pub heading: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossFix {
    pub fix: String,
    pub altitude: Option<i32>,
    pub speed: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachClearance {
    pub approach: String,
    pub straight_in: bool,
}

/// Assignments currently in effect for one aircraft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    pub assigned_heading: Option<f32>,
    pub turn: TurnMethod,
    pub assigned_altitude: Option<i32>,
    pub temporary_altitude: Option<i32>,
    pub assigned_speed: Option<i32>,
    pub direct_fix: Option<String>,
    pub depart_fix: Option<DepartFix>,
    pub cross_fix: Option<CrossFix>,
    pub expected_approach: Option<String>,
    pub cleared_approach: Option<ApproachClearance>,
}

impl NavState {
    /// Altitude the aircraft is currently working toward, if any.
    pub fn target_altitude(&self) -> Option<i32> {
        self.temporary_altitude
            .or(self.assigned_altitude)
            .or_else(|| self.cross_fix.as_ref().and_then(|cross| cross.altitude))
    }

    /// Speed the aircraft is currently working toward, if any.
    pub fn target_speed(&self) -> Option<i32> {
        self.assigned_speed
            .or_else(|| self.cross_fix.as_ref().and_then(|cross| cross.speed))
    }

    pub fn clear_lateral(&mut self) {
        self.assigned_heading = None;
        self.turn = TurnMethod::Closest;
        self.direct_fix = None;
        self.depart_fix = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub callsign: String,
    pub aircraft_type: String,
    pub flight_plan: FlightPlan,
    pub position: Point,
    pub heading: f32,
    pub altitude: f32,
    pub ias: f32,
    pub tracking_controller: Option<String>,
    pub controlling_controller: Option<String>,
    pub handoff_target: Option<String>,
    pub point_out_target: Option<String>,
    pub scratchpad: String,
    pub nav: NavState,
}

impl Aircraft {
    pub fn from_spawn(spawn: &AircraftSpawn) -> Self {
        Self {
            callsign: spawn.callsign.clone(),
            aircraft_type: spawn.aircraft_type.clone(),
            flight_plan: spawn.flight_plan.clone(),
            position: spawn.position,
            heading: normalize_heading(spawn.heading),
            altitude: spawn.altitude,
            ias: spawn.ias,
            tracking_controller: spawn.controller.clone(),
            controlling_controller: spawn.controller.clone(),
            handoff_target: None,
            point_out_target: None,
            scratchpad: String::new(),
            nav: NavState::default(),
        }
    }

    pub fn is_tracked_by(&self, controller: &str) -> bool {
        self.tracking_controller.as_deref() == Some(controller)
    }

    pub fn is_controlled_by(&self, controller: &str) -> bool {
        self.controlling_controller.as_deref() == Some(controller)
    }
}

/// Static scenario layout plus the live aircraft and signed-on controllers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub primary_controller: String,
    pub multi_controllers: BTreeSet<String>,
    pub locations: BTreeMap<String, Point>,
    pub approaches: BTreeMap<String, Approach>,
    pub controllers: BTreeSet<String>,
    pub aircraft: BTreeMap<String, Aircraft>,
}

impl World {
    pub fn from_configuration(config: &SimConfiguration) -> Self {
        Self {
            primary_controller: config.primary_controller.clone(),
            multi_controllers: config.multi_controllers.iter().cloned().collect(),
            locations: config.locations.clone(),
            approaches: config.approaches.clone(),
            controllers: BTreeSet::new(),
            aircraft: BTreeMap::new(),
        }
    }

    pub fn positions(&self) -> BTreeSet<String> {
        let mut positions = self.multi_controllers.clone();
        positions.insert(self.primary_controller.clone());
        positions
    }

    pub fn has_position(&self, callsign: &str) -> bool {
        callsign == self.primary_controller || self.multi_controllers.contains(callsign)
    }
}

/// State a signed-on controller polls for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldUpdate {
    pub tick: u64,
    pub sim_time_secs: f64,
    pub paused: bool,
    pub sim_rate: f32,
    pub launch_controller: Option<String>,
    pub controllers: BTreeSet<String>,
    pub aircraft: BTreeMap<String, Aircraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub tick: u64,
    pub aircraft_count: u32,
    pub controller_count: u32,
    pub hash: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64, aircraft_count: usize, controller_count: usize) -> Self {
        Self {
            tick,
            aircraft_count: aircraft_count as u32,
            controller_count: controller_count as u32,
            hash: 0,
        }
    }
}

/// Full point-in-time copy of one simulation instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub header: SnapshotHeader,
    pub name: String,
    pub configuration: String,
    pub sim_time_secs: f64,
    pub paused: bool,
    pub sim_rate: f32,
    pub launch_controller: Option<String>,
    pub world: World,
}

impl SimSnapshot {
    pub fn finalize(mut self) -> bincode::Result<Self> {
        self.header.hash = hash_snapshot(&self)?;
        Ok(self)
    }
}

/// Content digest over every field except the stored hash itself.
pub fn hash_snapshot(snapshot: &SimSnapshot) -> bincode::Result<u64> {
    let mut clone = snapshot.clone();
    clone.header.hash = 0;
    let encoded = bincode::serialize(&clone)?;
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    Ok(hasher.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewSimType {
    CreateLocal,
    CreateRemote,
    JoinRemote,
}

/// Launch request: either a new instance from a configuration, or a seat at
/// an existing named instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSimConfiguration {
    pub sim_type: NewSimType,
    /// Name of the new instance, or the instance to join.
    pub name: String,
    /// Configuration to launch; ignored when joining.
    pub configuration: String,
    /// Controller position to take; ignored when creating.
    pub position: String,
}

impl NewSimConfiguration {
    pub fn create_local(configuration: impl Into<String>) -> Self {
        Self {
            sim_type: NewSimType::CreateLocal,
            name: String::new(),
            configuration: configuration.into(),
            position: String::new(),
        }
    }

    pub fn create_remote(name: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            sim_type: NewSimType::CreateRemote,
            name: name.into(),
            configuration: configuration.into(),
            position: String::new(),
        }
    }

    pub fn join(name: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            sim_type: NewSimType::JoinRemote,
            name: name.into(),
            configuration: String::new(),
            position: position.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSimResult {
    pub world: World,
    pub token: ControllerToken,
}

/// Discovery entry for a running, joinable instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSim {
    pub configuration: String,
    pub description: String,
    pub available_positions: BTreeSet<String>,
}

/// JSON schema for scenario catalog files.
pub fn catalog_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SimConfigurationCatalog)
}

pub fn encode_payload<T: Serialize>(value: &T) -> bincode::Result<Vec<u8>> {
    bincode::serialize(value)
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> bincode::Result<T> {
    bincode::deserialize(bytes)
}

pub fn encode_snapshot_json(snapshot: &SimSnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_export_keeps_header() {
        let snapshot = SimSnapshot {
            header: SnapshotHeader::new(3, 0, 1),
            name: "east".to_string(),
            configuration: "JFK".to_string(),
            sim_time_secs: 1.5,
            paused: false,
            sim_rate: 1.0,
            launch_controller: None,
            world: World::default(),
        };
        let json = encode_snapshot_json(&snapshot).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["header"]["tick"], 3);
        assert_eq!(value["name"], "east");
    }

    #[test]
    fn catalog_schema_describes_scenarios() {
        let schema = serde_json::to_value(catalog_schema()).expect("schema json");
        let definitions = schema["definitions"].as_object().expect("definitions");
        assert!(definitions.contains_key("SimConfiguration"));
        assert!(definitions.contains_key("AircraftSpawn"));
    }

    #[test]
    fn bearing_follows_compass_convention() {
        let origin = Point::new(0.0, 0.0);
        assert!((origin.bearing_to(&Point::new(0.0, 5.0)) - 0.0).abs() < 1e-3);
        assert!((origin.bearing_to(&Point::new(5.0, 0.0)) - 90.0).abs() < 1e-3);
        assert!((origin.bearing_to(&Point::new(0.0, -5.0)) - 180.0).abs() < 1e-3);
        assert!((origin.bearing_to(&Point::new(-5.0, 0.0)) - 270.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_heading_wraps_negative_angles() {
        assert_eq!(normalize_heading(-90.0), 270.0);
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(725.0), 5.0);
        assert_eq!(normalize_heading(-1e-6), 0.0);
        assert!(normalize_heading(-1e-3) < 360.0);
    }

    #[test]
    fn redacted_token_hides_secret() {
        let token = ControllerToken::new("abcdefghijklmnop");
        assert_eq!(token.to_string(), "abcdef...");
        assert!(!format!("{token:?}").contains("ghij"));
    }

    #[test]
    fn snapshot_hash_ignores_stored_hash() {
        let snapshot = SimSnapshot {
            header: SnapshotHeader::new(42, 0, 1),
            name: "east".to_string(),
            configuration: "JFK".to_string(),
            ..Default::default()
        };
        let finalized = snapshot.clone().finalize().expect("finalize");
        assert_ne!(finalized.header.hash, 0);
        assert_eq!(hash_snapshot(&finalized).expect("hash"), finalized.header.hash);
    }

    #[test]
    fn temporary_altitude_takes_precedence() {
        let nav = NavState {
            assigned_altitude: Some(10_000),
            temporary_altitude: Some(5_000),
            ..Default::default()
        };
        assert_eq!(nav.target_altitude(), Some(5_000));
    }

    #[test]
    fn configuration_positions_include_primary() {
        let config = SimConfiguration {
            primary_controller: "JFK_APP".to_string(),
            multi_controllers: vec!["JFK_DEP".to_string(), "LGA_APP".to_string()],
            ..Default::default()
        };
        let positions = config.positions();
        assert_eq!(positions.len(), 3);
        assert!(positions.contains("JFK_APP"));
    }
}
