use std::collections::BTreeMap;
use std::convert::TryFrom;

use prost::Message;
use thiserror::Error;

use crate::{
    decode_payload, encode_payload, Aircraft, AircraftSpecifier, ControllerToken,
    HeadingAssignment, NewSimConfiguration, NewSimResult, NewSimType, RemoteSim,
    SimConfigurationCatalog, SimError, SimSnapshot, TurnMethod, WorldUpdate,
};

mod proto {
    include!(concat!(env!("OUT_DIR"), "/tracon.rpc.rs"));
}

use proto as pb;
use proto::request_envelope::Request as PbRequest;
use proto::response_envelope::Response as PbResponse;

/// A request tagged with the caller-chosen id echoed back in its response.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub call_id: u64,
    pub request: RpcRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub call_id: u64,
    pub result: Result<RpcResponse, SimError>,
}

/// Every operation reachable over the RPC channel.
///
/// Discovery and launch requests carry no token; everything else is routed
/// by the controller token it carries.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    ListConfigurations,
    ListActiveSims,
    NewSim(NewSimConfiguration),
    SignOff {
        token: ControllerToken,
    },
    SerializeSim {
        token: ControllerToken,
    },
    ChangeControlPosition {
        token: ControllerToken,
        callsign: String,
        keep_tracks: bool,
    },
    GetWorldUpdate {
        token: ControllerToken,
    },
    TogglePause {
        token: ControllerToken,
    },
    SetSimRate {
        token: ControllerToken,
        rate: f32,
    },
    TakeOrReturnLaunchControl {
        token: ControllerToken,
    },
    LaunchAircraft {
        token: ControllerToken,
        aircraft: Aircraft,
    },
    InitiateTrack(AircraftSpecifier),
    DropTrack(AircraftSpecifier),
    HandoffTrack {
        aircraft: AircraftSpecifier,
        controller: String,
    },
    AcceptHandoff(AircraftSpecifier),
    RejectHandoff(AircraftSpecifier),
    CancelHandoff(AircraftSpecifier),
    HandoffControl(AircraftSpecifier),
    PointOut {
        aircraft: AircraftSpecifier,
        controller: String,
    },
    SetScratchpad {
        aircraft: AircraftSpecifier,
        scratchpad: String,
    },
    AssignAltitude {
        aircraft: AircraftSpecifier,
        altitude: i32,
    },
    SetTemporaryAltitude {
        aircraft: AircraftSpecifier,
        altitude: i32,
    },
    AssignHeading {
        aircraft: AircraftSpecifier,
        heading: HeadingAssignment,
    },
    AssignSpeed {
        aircraft: AircraftSpecifier,
        speed: i32,
    },
    DirectFix {
        aircraft: AircraftSpecifier,
        fix: String,
    },
    DepartFixHeading {
        aircraft: AircraftSpecifier,
        fix: String,
        heading: i32,
    },
    CrossFixAt {
        aircraft: AircraftSpecifier,
        fix: String,
        altitude: Option<i32>,
        speed: Option<i32>,
    },
    ExpectApproach {
        aircraft: AircraftSpecifier,
        approach: String,
    },
    ClearedApproach {
        aircraft: AircraftSpecifier,
        approach: String,
        straight_in: bool,
    },
    GoAround(AircraftSpecifier),
    DeleteAircraft(AircraftSpecifier),
    RunAircraftCommands {
        aircraft: AircraftSpecifier,
        commands: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Ok,
    Configurations(SimConfigurationCatalog),
    ActiveSims(BTreeMap<String, RemoteSim>),
    NewSim(NewSimResult),
    Snapshot(SimSnapshot),
    WorldUpdate(WorldUpdate),
    /// Fresh token issued after a change of control position.
    ControlPosition {
        token: ControllerToken,
    },
}

#[derive(Debug, Error)]
pub enum EnvelopeEncodeError {
    #[error("encode failed: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("payload encode failed: {0}")]
    Payload(#[from] bincode::Error),
}

/// Error returned when decoding an envelope fails.
///
/// The protobuf schema reserves `*_UNSPECIFIED` enum values (encoded as `0`);
/// decoding one yields [`EnvelopeDecodeError::InvalidEnum`].
#[derive(Debug, Error)]
pub enum EnvelopeDecodeError {
    #[error("decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("envelope missing payload")]
    MissingPayload,
    #[error("invalid enum value {value} for {field}")]
    InvalidEnum { field: &'static str, value: i32 },
    #[error("invalid detail {detail:?} for {field}")]
    InvalidDetail { field: &'static str, detail: String },
    #[error("payload decode failed: {0}")]
    Payload(#[from] bincode::Error),
}

impl RpcRequest {
    /// Stable operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::ListConfigurations => "list_configurations",
            RpcRequest::ListActiveSims => "list_active_sims",
            RpcRequest::NewSim(_) => "new_sim",
            RpcRequest::SignOff { .. } => "sign_off",
            RpcRequest::SerializeSim { .. } => "serialize_sim",
            RpcRequest::ChangeControlPosition { .. } => "change_control_position",
            RpcRequest::GetWorldUpdate { .. } => "get_world_update",
            RpcRequest::TogglePause { .. } => "toggle_pause",
            RpcRequest::SetSimRate { .. } => "set_sim_rate",
            RpcRequest::TakeOrReturnLaunchControl { .. } => "take_or_return_launch_control",
            RpcRequest::LaunchAircraft { .. } => "launch_aircraft",
            RpcRequest::InitiateTrack(_) => "initiate_track",
            RpcRequest::DropTrack(_) => "drop_track",
            RpcRequest::HandoffTrack { .. } => "handoff_track",
            RpcRequest::AcceptHandoff(_) => "accept_handoff",
            RpcRequest::RejectHandoff(_) => "reject_handoff",
            RpcRequest::CancelHandoff(_) => "cancel_handoff",
            RpcRequest::HandoffControl(_) => "handoff_control",
            RpcRequest::PointOut { .. } => "point_out",
            RpcRequest::SetScratchpad { .. } => "set_scratchpad",
            RpcRequest::AssignAltitude { .. } => "assign_altitude",
            RpcRequest::SetTemporaryAltitude { .. } => "set_temporary_altitude",
            RpcRequest::AssignHeading { .. } => "assign_heading",
            RpcRequest::AssignSpeed { .. } => "assign_speed",
            RpcRequest::DirectFix { .. } => "direct_fix",
            RpcRequest::DepartFixHeading { .. } => "depart_fix_heading",
            RpcRequest::CrossFixAt { .. } => "cross_fix_at",
            RpcRequest::ExpectApproach { .. } => "expect_approach",
            RpcRequest::ClearedApproach { .. } => "cleared_approach",
            RpcRequest::GoAround(_) => "go_around",
            RpcRequest::DeleteAircraft(_) => "delete_aircraft",
            RpcRequest::RunAircraftCommands { .. } => "run_aircraft_commands",
        }
    }

    /// Token the request is routed by; `None` for discovery and launch.
    pub fn token(&self) -> Option<&ControllerToken> {
        match self {
            RpcRequest::ListConfigurations | RpcRequest::ListActiveSims | RpcRequest::NewSim(_) => {
                None
            }
            RpcRequest::SignOff { token }
            | RpcRequest::SerializeSim { token }
            | RpcRequest::ChangeControlPosition { token, .. }
            | RpcRequest::GetWorldUpdate { token }
            | RpcRequest::TogglePause { token }
            | RpcRequest::SetSimRate { token, .. }
            | RpcRequest::TakeOrReturnLaunchControl { token }
            | RpcRequest::LaunchAircraft { token, .. } => Some(token),
            RpcRequest::InitiateTrack(aircraft)
            | RpcRequest::DropTrack(aircraft)
            | RpcRequest::AcceptHandoff(aircraft)
            | RpcRequest::RejectHandoff(aircraft)
            | RpcRequest::CancelHandoff(aircraft)
            | RpcRequest::HandoffControl(aircraft)
            | RpcRequest::GoAround(aircraft)
            | RpcRequest::DeleteAircraft(aircraft)
            | RpcRequest::HandoffTrack { aircraft, .. }
            | RpcRequest::PointOut { aircraft, .. }
            | RpcRequest::SetScratchpad { aircraft, .. }
            | RpcRequest::AssignAltitude { aircraft, .. }
            | RpcRequest::SetTemporaryAltitude { aircraft, .. }
            | RpcRequest::AssignHeading { aircraft, .. }
            | RpcRequest::AssignSpeed { aircraft, .. }
            | RpcRequest::DirectFix { aircraft, .. }
            | RpcRequest::DepartFixHeading { aircraft, .. }
            | RpcRequest::CrossFixAt { aircraft, .. }
            | RpcRequest::ExpectApproach { aircraft, .. }
            | RpcRequest::ClearedApproach { aircraft, .. }
            | RpcRequest::RunAircraftCommands { aircraft, .. } => Some(&aircraft.token),
        }
    }
}

impl RequestEnvelope {
    pub fn new(call_id: u64, request: RpcRequest) -> Self {
        Self { call_id, request }
    }

    /// Encode the envelope into a protobuf binary frame.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, EnvelopeEncodeError> {
        let proto = self.to_proto()?;
        let mut buffer = Vec::with_capacity(proto.encoded_len());
        proto.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode an envelope from a protobuf binary frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeDecodeError> {
        Self::decode_tagged(bytes).1
    }

    /// Like [`RequestEnvelope::decode`], but also returns the call id whenever
    /// the protobuf layer parsed one, so a bad payload can still be answered.
    pub fn decode_tagged(bytes: &[u8]) -> (Option<u64>, Result<Self, EnvelopeDecodeError>) {
        match pb::RequestEnvelope::decode(bytes) {
            Ok(proto) => (Some(proto.call_id), Self::try_from_proto(proto)),
            Err(err) => (None, Err(err.into())),
        }
    }

    fn to_proto(&self) -> Result<pb::RequestEnvelope, EnvelopeEncodeError> {
        let request = match &self.request {
            RpcRequest::ListConfigurations => PbRequest::ListConfigurations(pb::Empty {}),
            RpcRequest::ListActiveSims => PbRequest::ListActiveSims(pb::Empty {}),
            RpcRequest::NewSim(config) => PbRequest::NewSim(pb::NewSimRequest {
                sim_type: new_sim_type_to_proto(config.sim_type) as i32,
                name: config.name.clone(),
                configuration: config.configuration.clone(),
                position: config.position.clone(),
            }),
            RpcRequest::SignOff { token } => PbRequest::SignOff(token_request(token)),
            RpcRequest::SerializeSim { token } => PbRequest::SerializeSim(token_request(token)),
            RpcRequest::ChangeControlPosition {
                token,
                callsign,
                keep_tracks,
            } => PbRequest::ChangeControlPosition(pb::ChangeControlPositionRequest {
                controller_token: token.as_str().to_string(),
                callsign: callsign.clone(),
                keep_tracks: *keep_tracks,
            }),
            RpcRequest::GetWorldUpdate { token } => {
                PbRequest::GetWorldUpdate(token_request(token))
            }
            RpcRequest::TogglePause { token } => PbRequest::TogglePause(token_request(token)),
            RpcRequest::SetSimRate { token, rate } => {
                PbRequest::SetSimRate(pb::SetSimRateRequest {
                    controller_token: token.as_str().to_string(),
                    rate: *rate,
                })
            }
            RpcRequest::TakeOrReturnLaunchControl { token } => {
                PbRequest::TakeOrReturnLaunchControl(token_request(token))
            }
            RpcRequest::LaunchAircraft { token, aircraft } => {
                PbRequest::LaunchAircraft(pb::LaunchAircraftRequest {
                    controller_token: token.as_str().to_string(),
                    aircraft: encode_payload(aircraft)?,
                })
            }
            RpcRequest::InitiateTrack(aircraft) => {
                PbRequest::InitiateTrack(aircraft_request(aircraft))
            }
            RpcRequest::DropTrack(aircraft) => PbRequest::DropTrack(aircraft_request(aircraft)),
            RpcRequest::HandoffTrack {
                aircraft,
                controller,
            } => PbRequest::HandoffTrack(controller_target(aircraft, controller)),
            RpcRequest::AcceptHandoff(aircraft) => {
                PbRequest::AcceptHandoff(aircraft_request(aircraft))
            }
            RpcRequest::RejectHandoff(aircraft) => {
                PbRequest::RejectHandoff(aircraft_request(aircraft))
            }
            RpcRequest::CancelHandoff(aircraft) => {
                PbRequest::CancelHandoff(aircraft_request(aircraft))
            }
            RpcRequest::HandoffControl(aircraft) => {
                PbRequest::HandoffControl(aircraft_request(aircraft))
            }
            RpcRequest::PointOut {
                aircraft,
                controller,
            } => PbRequest::PointOut(controller_target(aircraft, controller)),
            RpcRequest::SetScratchpad {
                aircraft,
                scratchpad,
            } => PbRequest::SetScratchpad(pb::ScratchpadRequest {
                controller_token: aircraft.token.as_str().to_string(),
                callsign: aircraft.callsign.clone(),
                scratchpad: scratchpad.clone(),
            }),
            RpcRequest::AssignAltitude { aircraft, altitude } => {
                PbRequest::AssignAltitude(altitude_request(aircraft, *altitude))
            }
            RpcRequest::SetTemporaryAltitude { aircraft, altitude } => {
                PbRequest::SetTemporaryAltitude(altitude_request(aircraft, *altitude))
            }
            RpcRequest::AssignHeading { aircraft, heading } => {
                let (kind, value, turn) = heading_to_proto(*heading);
                PbRequest::AssignHeading(pb::HeadingRequest {
                    controller_token: aircraft.token.as_str().to_string(),
                    callsign: aircraft.callsign.clone(),
                    kind: kind as i32,
                    value,
                    turn: turn as i32,
                })
            }
            RpcRequest::AssignSpeed { aircraft, speed } => {
                PbRequest::AssignSpeed(pb::SpeedRequest {
                    controller_token: aircraft.token.as_str().to_string(),
                    callsign: aircraft.callsign.clone(),
                    speed: *speed,
                })
            }
            RpcRequest::DirectFix { aircraft, fix } => {
                PbRequest::DirectFix(fix_request(aircraft, fix, 0, None, None))
            }
            RpcRequest::DepartFixHeading {
                aircraft,
                fix,
                heading,
            } => PbRequest::DepartFixHeading(fix_request(aircraft, fix, *heading, None, None)),
            RpcRequest::CrossFixAt {
                aircraft,
                fix,
                altitude,
                speed,
            } => PbRequest::CrossFixAt(fix_request(aircraft, fix, 0, *altitude, *speed)),
            RpcRequest::ExpectApproach { aircraft, approach } => {
                PbRequest::ExpectApproach(approach_request(aircraft, approach, false))
            }
            RpcRequest::ClearedApproach {
                aircraft,
                approach,
                straight_in,
            } => PbRequest::ClearedApproach(approach_request(aircraft, approach, *straight_in)),
            RpcRequest::GoAround(aircraft) => PbRequest::GoAround(aircraft_request(aircraft)),
            RpcRequest::DeleteAircraft(aircraft) => {
                PbRequest::DeleteAircraft(aircraft_request(aircraft))
            }
            RpcRequest::RunAircraftCommands { aircraft, commands } => {
                PbRequest::RunAircraftCommands(pb::AircraftCommandsRequest {
                    controller_token: aircraft.token.as_str().to_string(),
                    callsign: aircraft.callsign.clone(),
                    commands: commands.clone(),
                })
            }
        };

        Ok(pb::RequestEnvelope {
            call_id: self.call_id,
            request: Some(request),
        })
    }

    fn try_from_proto(proto: pb::RequestEnvelope) -> Result<Self, EnvelopeDecodeError> {
        let request = match proto.request.ok_or(EnvelopeDecodeError::MissingPayload)? {
            PbRequest::ListConfigurations(_) => RpcRequest::ListConfigurations,
            PbRequest::ListActiveSims(_) => RpcRequest::ListActiveSims,
            PbRequest::NewSim(req) => RpcRequest::NewSim(NewSimConfiguration {
                sim_type: new_sim_type_from_proto(req.sim_type)?,
                name: req.name,
                configuration: req.configuration,
                position: req.position,
            }),
            PbRequest::SignOff(req) => RpcRequest::SignOff {
                token: ControllerToken::new(req.controller_token),
            },
            PbRequest::SerializeSim(req) => RpcRequest::SerializeSim {
                token: ControllerToken::new(req.controller_token),
            },
            PbRequest::ChangeControlPosition(req) => RpcRequest::ChangeControlPosition {
                token: ControllerToken::new(req.controller_token),
                callsign: req.callsign,
                keep_tracks: req.keep_tracks,
            },
            PbRequest::GetWorldUpdate(req) => RpcRequest::GetWorldUpdate {
                token: ControllerToken::new(req.controller_token),
            },
            PbRequest::TogglePause(req) => RpcRequest::TogglePause {
                token: ControllerToken::new(req.controller_token),
            },
            PbRequest::SetSimRate(req) => RpcRequest::SetSimRate {
                token: ControllerToken::new(req.controller_token),
                rate: req.rate,
            },
            PbRequest::TakeOrReturnLaunchControl(req) => RpcRequest::TakeOrReturnLaunchControl {
                token: ControllerToken::new(req.controller_token),
            },
            PbRequest::LaunchAircraft(req) => RpcRequest::LaunchAircraft {
                token: ControllerToken::new(req.controller_token),
                aircraft: decode_payload(&req.aircraft)?,
            },
            PbRequest::InitiateTrack(req) => RpcRequest::InitiateTrack(specifier(req)),
            PbRequest::DropTrack(req) => RpcRequest::DropTrack(specifier(req)),
            PbRequest::HandoffTrack(req) => RpcRequest::HandoffTrack {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                controller: req.controller,
            },
            PbRequest::AcceptHandoff(req) => RpcRequest::AcceptHandoff(specifier(req)),
            PbRequest::RejectHandoff(req) => RpcRequest::RejectHandoff(specifier(req)),
            PbRequest::CancelHandoff(req) => RpcRequest::CancelHandoff(specifier(req)),
            PbRequest::HandoffControl(req) => RpcRequest::HandoffControl(specifier(req)),
            PbRequest::PointOut(req) => RpcRequest::PointOut {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                controller: req.controller,
            },
            PbRequest::SetScratchpad(req) => RpcRequest::SetScratchpad {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                scratchpad: req.scratchpad,
            },
            PbRequest::AssignAltitude(req) => RpcRequest::AssignAltitude {
                altitude: req.altitude,
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
            },
            PbRequest::SetTemporaryAltitude(req) => RpcRequest::SetTemporaryAltitude {
                altitude: req.altitude,
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
            },
            PbRequest::AssignHeading(req) => RpcRequest::AssignHeading {
                heading: heading_from_proto(req.kind, req.value, req.turn)?,
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
            },
            PbRequest::AssignSpeed(req) => RpcRequest::AssignSpeed {
                speed: req.speed,
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
            },
            PbRequest::DirectFix(req) => RpcRequest::DirectFix {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                fix: req.fix,
            },
            PbRequest::DepartFixHeading(req) => RpcRequest::DepartFixHeading {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                fix: req.fix,
                heading: req.heading,
            },
            PbRequest::CrossFixAt(req) => RpcRequest::CrossFixAt {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                fix: req.fix,
                altitude: req.altitude,
                speed: req.speed,
            },
            PbRequest::ExpectApproach(req) => RpcRequest::ExpectApproach {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                approach: req.approach,
            },
            PbRequest::ClearedApproach(req) => RpcRequest::ClearedApproach {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                approach: req.approach,
                straight_in: req.straight_in,
            },
            PbRequest::GoAround(req) => RpcRequest::GoAround(specifier(req)),
            PbRequest::DeleteAircraft(req) => RpcRequest::DeleteAircraft(specifier(req)),
            PbRequest::RunAircraftCommands(req) => RpcRequest::RunAircraftCommands {
                aircraft: AircraftSpecifier::new(
                    ControllerToken::new(req.controller_token),
                    req.callsign,
                ),
                commands: req.commands,
            },
        };

        Ok(RequestEnvelope {
            call_id: proto.call_id,
            request,
        })
    }
}

impl ResponseEnvelope {
    pub fn new(call_id: u64, result: Result<RpcResponse, SimError>) -> Self {
        Self { call_id, result }
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, EnvelopeEncodeError> {
        let proto = self.to_proto()?;
        let mut buffer = Vec::with_capacity(proto.encoded_len());
        proto.encode(&mut buffer)?;
        Ok(buffer)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeDecodeError> {
        let proto = pb::ResponseEnvelope::decode(bytes)?;
        Self::try_from_proto(proto)
    }

    fn to_proto(&self) -> Result<pb::ResponseEnvelope, EnvelopeEncodeError> {
        let response = match &self.result {
            Ok(RpcResponse::Ok) => PbResponse::Ok(pb::Empty {}),
            Ok(RpcResponse::Configurations(catalog)) => {
                PbResponse::Configurations(encode_payload(catalog)?)
            }
            Ok(RpcResponse::ActiveSims(sims)) => PbResponse::ActiveSims(encode_payload(sims)?),
            Ok(RpcResponse::NewSim(result)) => PbResponse::NewSim(pb::NewSimResult {
                world: encode_payload(&result.world)?,
                controller_token: result.token.as_str().to_string(),
            }),
            Ok(RpcResponse::Snapshot(snapshot)) => PbResponse::Snapshot(encode_payload(snapshot)?),
            Ok(RpcResponse::WorldUpdate(update)) => {
                PbResponse::WorldUpdate(encode_payload(update)?)
            }
            Ok(RpcResponse::ControlPosition { token }) => {
                PbResponse::ControlPosition(token_request(token))
            }
            Err(err) => PbResponse::Error(error_to_proto(err)),
        };

        Ok(pb::ResponseEnvelope {
            call_id: self.call_id,
            response: Some(response),
        })
    }

    fn try_from_proto(proto: pb::ResponseEnvelope) -> Result<Self, EnvelopeDecodeError> {
        let result = match proto.response.ok_or(EnvelopeDecodeError::MissingPayload)? {
            PbResponse::Ok(_) => Ok(RpcResponse::Ok),
            PbResponse::Error(err) => Err(error_from_proto(err)?),
            PbResponse::Configurations(bytes) => {
                Ok(RpcResponse::Configurations(decode_payload(&bytes)?))
            }
            PbResponse::ActiveSims(bytes) => Ok(RpcResponse::ActiveSims(decode_payload(&bytes)?)),
            PbResponse::NewSim(result) => Ok(RpcResponse::NewSim(NewSimResult {
                world: decode_payload(&result.world)?,
                token: ControllerToken::new(result.controller_token),
            })),
            PbResponse::Snapshot(bytes) => Ok(RpcResponse::Snapshot(decode_payload(&bytes)?)),
            PbResponse::WorldUpdate(bytes) => Ok(RpcResponse::WorldUpdate(decode_payload(&bytes)?)),
            PbResponse::ControlPosition(req) => Ok(RpcResponse::ControlPosition {
                token: ControllerToken::new(req.controller_token),
            }),
        };

        Ok(ResponseEnvelope {
            call_id: proto.call_id,
            result,
        })
    }
}

fn token_request(token: &ControllerToken) -> pb::TokenRequest {
    pb::TokenRequest {
        controller_token: token.as_str().to_string(),
    }
}

fn aircraft_request(aircraft: &AircraftSpecifier) -> pb::AircraftRequest {
    pb::AircraftRequest {
        controller_token: aircraft.token.as_str().to_string(),
        callsign: aircraft.callsign.clone(),
    }
}

fn specifier(req: pb::AircraftRequest) -> AircraftSpecifier {
    AircraftSpecifier::new(ControllerToken::new(req.controller_token), req.callsign)
}

fn controller_target(aircraft: &AircraftSpecifier, controller: &str) -> pb::ControllerTargetRequest {
    pb::ControllerTargetRequest {
        controller_token: aircraft.token.as_str().to_string(),
        callsign: aircraft.callsign.clone(),
        controller: controller.to_string(),
    }
}

fn altitude_request(aircraft: &AircraftSpecifier, altitude: i32) -> pb::AltitudeRequest {
    pb::AltitudeRequest {
        controller_token: aircraft.token.as_str().to_string(),
        callsign: aircraft.callsign.clone(),
        altitude,
    }
}

fn fix_request(
    aircraft: &AircraftSpecifier,
    fix: &str,
    heading: i32,
    altitude: Option<i32>,
    speed: Option<i32>,
) -> pb::FixRequest {
    pb::FixRequest {
        controller_token: aircraft.token.as_str().to_string(),
        callsign: aircraft.callsign.clone(),
        fix: fix.to_string(),
        heading,
        altitude,
        speed,
    }
}

fn approach_request(
    aircraft: &AircraftSpecifier,
    approach: &str,
    straight_in: bool,
) -> pb::ApproachRequest {
    pb::ApproachRequest {
        controller_token: aircraft.token.as_str().to_string(),
        callsign: aircraft.callsign.clone(),
        approach: approach.to_string(),
        straight_in,
    }
}

fn new_sim_type_to_proto(value: NewSimType) -> pb::NewSimType {
    match value {
        NewSimType::CreateLocal => pb::NewSimType::CreateLocal,
        NewSimType::CreateRemote => pb::NewSimType::CreateRemote,
        NewSimType::JoinRemote => pb::NewSimType::JoinRemote,
    }
}

fn new_sim_type_from_proto(value: i32) -> Result<NewSimType, EnvelopeDecodeError> {
    match pb::NewSimType::try_from(value) {
        Ok(pb::NewSimType::CreateLocal) => Ok(NewSimType::CreateLocal),
        Ok(pb::NewSimType::CreateRemote) => Ok(NewSimType::CreateRemote),
        Ok(pb::NewSimType::JoinRemote) => Ok(NewSimType::JoinRemote),
        _ => Err(EnvelopeDecodeError::InvalidEnum {
            field: "NewSimType",
            value,
        }),
    }
}

fn turn_method_to_proto(value: TurnMethod) -> pb::TurnMethod {
    match value {
        TurnMethod::Closest => pb::TurnMethod::Closest,
        TurnMethod::Left => pb::TurnMethod::Left,
        TurnMethod::Right => pb::TurnMethod::Right,
    }
}

fn turn_method_from_proto(value: i32) -> Result<TurnMethod, EnvelopeDecodeError> {
    match pb::TurnMethod::try_from(value) {
        Ok(pb::TurnMethod::Closest) => Ok(TurnMethod::Closest),
        Ok(pb::TurnMethod::Left) => Ok(TurnMethod::Left),
        Ok(pb::TurnMethod::Right) => Ok(TurnMethod::Right),
        _ => Err(EnvelopeDecodeError::InvalidEnum {
            field: "TurnMethod",
            value,
        }),
    }
}

fn heading_to_proto(heading: HeadingAssignment) -> (pb::HeadingKind, i32, pb::TurnMethod) {
    match heading {
        HeadingAssignment::Present => (pb::HeadingKind::Present, 0, pb::TurnMethod::Closest),
        HeadingAssignment::Heading { heading, turn } => (
            pb::HeadingKind::Absolute,
            heading,
            turn_method_to_proto(turn),
        ),
        HeadingAssignment::LeftDegrees(degrees) => {
            (pb::HeadingKind::LeftDegrees, degrees, pb::TurnMethod::Left)
        }
        HeadingAssignment::RightDegrees(degrees) => {
            (pb::HeadingKind::RightDegrees, degrees, pb::TurnMethod::Right)
        }
    }
}

fn heading_from_proto(
    kind: i32,
    value: i32,
    turn: i32,
) -> Result<HeadingAssignment, EnvelopeDecodeError> {
    match pb::HeadingKind::try_from(kind) {
        Ok(pb::HeadingKind::Present) => Ok(HeadingAssignment::Present),
        Ok(pb::HeadingKind::Absolute) => Ok(HeadingAssignment::Heading {
            heading: value,
            turn: turn_method_from_proto(turn)?,
        }),
        Ok(pb::HeadingKind::LeftDegrees) => Ok(HeadingAssignment::LeftDegrees(value)),
        Ok(pb::HeadingKind::RightDegrees) => Ok(HeadingAssignment::RightDegrees(value)),
        _ => Err(EnvelopeDecodeError::InvalidEnum {
            field: "HeadingKind",
            value: kind,
        }),
    }
}

fn error_to_proto(err: &SimError) -> pb::RpcError {
    match err {
        SimError::CommandExecution { cause, remaining } => {
            let (kind, detail) = error_parts(cause);
            pb::RpcError {
                kind: pb::ErrorKind::CommandExecution as i32,
                detail: String::new(),
                remaining: remaining.clone(),
                cause: Some(pb::ErrorCause {
                    kind: kind as i32,
                    detail,
                }),
            }
        }
        other => {
            let (kind, detail) = error_parts(other);
            pb::RpcError {
                kind: kind as i32,
                detail,
                remaining: Vec::new(),
                cause: None,
            }
        }
    }
}

fn error_from_proto(err: pb::RpcError) -> Result<SimError, EnvelopeDecodeError> {
    if err.kind == pb::ErrorKind::CommandExecution as i32 {
        let cause = err.cause.ok_or(EnvelopeDecodeError::MissingPayload)?;
        let cause = error_from_parts(cause.kind, cause.detail)?;
        return Ok(SimError::command_execution(cause, err.remaining));
    }
    error_from_parts(err.kind, err.detail)
}

/// Splits an error into its wire kind and the single argument it carries.
fn error_parts(err: &SimError) -> (pb::ErrorKind, String) {
    use pb::ErrorKind as K;
    match err {
        SimError::NoSimForToken => (K::NoSimForToken, String::new()),
        SimError::UnknownToken => (K::UnknownToken, String::new()),
        SimError::TokenReused => (K::TokenReused, String::new()),
        SimError::DuplicateName(name) => (K::DuplicateName, name.clone()),
        SimError::PositionOccupied(position) => (K::PositionOccupied, position.clone()),
        SimError::UnknownSimulation(name) => (K::UnknownSimulation, name.clone()),
        SimError::UnknownConfiguration(name) => (K::UnknownConfiguration, name.clone()),
        SimError::InvalidCommandSyntax => (K::InvalidCommandSyntax, String::new()),
        SimError::InvalidNumber(value) => (K::InvalidNumber, value.clone()),
        SimError::CommandExecution { cause, .. } => error_parts(cause),
        SimError::NoController(callsign) => (K::NoController, callsign.clone()),
        SimError::NoAircraft(callsign) => (K::NoAircraft, callsign.clone()),
        SimError::OtherControllerHasTrack(callsign) => {
            (K::OtherControllerHasTrack, callsign.clone())
        }
        SimError::NotTrackedByMe(callsign) => (K::NotTrackedByMe, callsign.clone()),
        SimError::NotBeingHandedOffToMe(callsign) => (K::NotBeingHandedOffToMe, callsign.clone()),
        SimError::NoHandoffInProgress(callsign) => (K::NoHandoffInProgress, callsign.clone()),
        SimError::InvalidHandoffTarget(callsign) => (K::InvalidHandoffTarget, callsign.clone()),
        SimError::UnknownFix(fix) => (K::UnknownFix, fix.clone()),
        SimError::UnknownApproach(approach) => (K::UnknownApproach, approach.clone()),
        SimError::InvalidAltitude(value) => (K::InvalidAltitude, value.to_string()),
        SimError::InvalidHeading(value) => (K::InvalidHeading, value.to_string()),
        SimError::InvalidSpeed(value) => (K::InvalidSpeed, value.to_string()),
        SimError::InvalidSimRate(value) => (K::InvalidSimRate, value.to_string()),
        SimError::LaunchControlHeld(callsign) => (K::LaunchControlHeld, callsign.clone()),
        SimError::DuplicateCallsign(callsign) => (K::DuplicateCallsign, callsign.clone()),
        SimError::MalformedRequest(reason) => (K::MalformedRequest, reason.clone()),
    }
}

fn error_from_parts(kind: i32, detail: String) -> Result<SimError, EnvelopeDecodeError> {
    use pb::ErrorKind as K;
    let err = match K::try_from(kind) {
        Ok(K::NoSimForToken) => SimError::NoSimForToken,
        Ok(K::UnknownToken) => SimError::UnknownToken,
        Ok(K::TokenReused) => SimError::TokenReused,
        Ok(K::DuplicateName) => SimError::DuplicateName(detail),
        Ok(K::PositionOccupied) => SimError::PositionOccupied(detail),
        Ok(K::UnknownSimulation) => SimError::UnknownSimulation(detail),
        Ok(K::UnknownConfiguration) => SimError::UnknownConfiguration(detail),
        Ok(K::InvalidCommandSyntax) => SimError::InvalidCommandSyntax,
        Ok(K::InvalidNumber) => SimError::InvalidNumber(detail),
        Ok(K::NoController) => SimError::NoController(detail),
        Ok(K::NoAircraft) => SimError::NoAircraft(detail),
        Ok(K::OtherControllerHasTrack) => SimError::OtherControllerHasTrack(detail),
        Ok(K::NotTrackedByMe) => SimError::NotTrackedByMe(detail),
        Ok(K::NotBeingHandedOffToMe) => SimError::NotBeingHandedOffToMe(detail),
        Ok(K::NoHandoffInProgress) => SimError::NoHandoffInProgress(detail),
        Ok(K::InvalidHandoffTarget) => SimError::InvalidHandoffTarget(detail),
        Ok(K::UnknownFix) => SimError::UnknownFix(detail),
        Ok(K::UnknownApproach) => SimError::UnknownApproach(detail),
        Ok(K::InvalidAltitude) => SimError::InvalidAltitude(parse_detail(&detail, "InvalidAltitude")?),
        Ok(K::InvalidHeading) => SimError::InvalidHeading(parse_detail(&detail, "InvalidHeading")?),
        Ok(K::InvalidSpeed) => SimError::InvalidSpeed(parse_detail(&detail, "InvalidSpeed")?),
        Ok(K::InvalidSimRate) => SimError::InvalidSimRate(parse_detail(&detail, "InvalidSimRate")?),
        Ok(K::LaunchControlHeld) => SimError::LaunchControlHeld(detail),
        Ok(K::DuplicateCallsign) => SimError::DuplicateCallsign(detail),
        Ok(K::MalformedRequest) => SimError::MalformedRequest(detail),
        Ok(K::CommandExecution) | Ok(K::Unspecified) | Err(_) => {
            return Err(EnvelopeDecodeError::InvalidEnum {
                field: "ErrorKind",
                value: kind,
            })
        }
    };
    Ok(err)
}

fn parse_detail<T: std::str::FromStr>(
    detail: &str,
    field: &'static str,
) -> Result<T, EnvelopeDecodeError> {
    detail
        .parse::<T>()
        .map_err(|_| EnvelopeDecodeError::InvalidDetail {
            field,
            detail: detail.to_string(),
        })
}
