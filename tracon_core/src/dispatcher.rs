use std::sync::Arc;

use tracing::debug;
use tracon_runtime::{
    AircraftSpecifier, ControllerToken, ParsedCommand, RpcRequest, RpcResponse, SimError,
};

use crate::manager::SimManager;
use crate::sim::Sim;

/// Routes every remote call to the instance its token belongs to.
///
/// Token resolution happens before any other validation; instance errors are
/// returned unchanged.
#[derive(Clone)]
pub struct SimDispatcher {
    manager: Arc<SimManager>,
}

impl SimDispatcher {
    pub fn new(manager: Arc<SimManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SimManager> {
        &self.manager
    }

    pub fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse, SimError> {
        debug!(
            target: "tracon::server",
            operation = request.name(),
            token = ?request.token(),
            "rpc.dispatch"
        );

        match request {
            RpcRequest::ListConfigurations => Ok(RpcResponse::Configurations(
                self.manager.list_configurations(),
            )),
            RpcRequest::ListActiveSims => {
                Ok(RpcResponse::ActiveSims(self.manager.list_active_sims()))
            }
            RpcRequest::NewSim(config) => self
                .manager
                .create_or_join(&config)
                .map(RpcResponse::NewSim),
            RpcRequest::SignOff { token } => {
                self.manager.sign_off(&token).map(|()| RpcResponse::Ok)
            }
            RpcRequest::SerializeSim { token } => self
                .manager
                .serialize_sim(&token)
                .map(RpcResponse::Snapshot),
            RpcRequest::ChangeControlPosition {
                token,
                callsign,
                keep_tracks,
            } => self
                .manager
                .change_control_position(&token, &callsign, keep_tracks)
                .map(|token| RpcResponse::ControlPosition { token }),
            RpcRequest::GetWorldUpdate { token } => self
                .sim(&token)?
                .get_world_update(&token)
                .map(RpcResponse::WorldUpdate),
            RpcRequest::TogglePause { token } => ok(self.sim(&token)?.toggle_pause(&token)),
            RpcRequest::SetSimRate { token, rate } => {
                ok(self.sim(&token)?.set_sim_rate(&token, rate))
            }
            RpcRequest::TakeOrReturnLaunchControl { token } => {
                ok(self.sim(&token)?.take_or_return_launch_control(&token))
            }
            RpcRequest::LaunchAircraft { token, aircraft } => {
                ok(self.sim(&token)?.launch_aircraft(&token, aircraft))
            }
            RpcRequest::InitiateTrack(aircraft) => {
                ok(self.sim(&aircraft.token)?.initiate_track(&aircraft))
            }
            RpcRequest::DropTrack(aircraft) => ok(self.sim(&aircraft.token)?.drop_track(&aircraft)),
            RpcRequest::HandoffTrack {
                aircraft,
                controller,
            } => ok(self
                .sim(&aircraft.token)?
                .handoff_track(&aircraft, &controller)),
            RpcRequest::AcceptHandoff(aircraft) => {
                ok(self.sim(&aircraft.token)?.accept_handoff(&aircraft))
            }
            RpcRequest::RejectHandoff(aircraft) => {
                ok(self.sim(&aircraft.token)?.reject_handoff(&aircraft))
            }
            RpcRequest::CancelHandoff(aircraft) => {
                ok(self.sim(&aircraft.token)?.cancel_handoff(&aircraft))
            }
            RpcRequest::HandoffControl(aircraft) => {
                ok(self.sim(&aircraft.token)?.handoff_control(&aircraft))
            }
            RpcRequest::PointOut {
                aircraft,
                controller,
            } => ok(self.sim(&aircraft.token)?.point_out(&aircraft, &controller)),
            RpcRequest::SetScratchpad {
                aircraft,
                scratchpad,
            } => ok(self
                .sim(&aircraft.token)?
                .set_scratchpad(&aircraft, &scratchpad)),
            RpcRequest::AssignAltitude { aircraft, altitude } => {
                self.clearance(&aircraft, ParsedCommand::AssignAltitude { altitude })
            }
            RpcRequest::SetTemporaryAltitude { aircraft, altitude } => self.clearance(
                &aircraft,
                ParsedCommand::AssignTemporaryAltitude { altitude },
            ),
            RpcRequest::AssignHeading { aircraft, heading } => {
                self.clearance(&aircraft, ParsedCommand::AssignHeading(heading))
            }
            RpcRequest::AssignSpeed { aircraft, speed } => {
                self.clearance(&aircraft, ParsedCommand::AssignSpeed { speed })
            }
            RpcRequest::DirectFix { aircraft, fix } => {
                self.clearance(&aircraft, ParsedCommand::DirectToFix { fix })
            }
            RpcRequest::DepartFixHeading {
                aircraft,
                fix,
                heading,
            } => self.clearance(
                &aircraft,
                ParsedCommand::DepartFixOnHeading { fix, heading },
            ),
            RpcRequest::CrossFixAt {
                aircraft,
                fix,
                altitude,
                speed,
            } => self.clearance(
                &aircraft,
                ParsedCommand::CrossFixAt {
                    fix,
                    altitude,
                    speed,
                },
            ),
            RpcRequest::ExpectApproach { aircraft, approach } => {
                self.clearance(&aircraft, ParsedCommand::ExpectApproach { approach })
            }
            RpcRequest::ClearedApproach {
                aircraft,
                approach,
                straight_in,
            } => self.clearance(
                &aircraft,
                ParsedCommand::ClearedApproach {
                    approach,
                    straight_in,
                },
            ),
            RpcRequest::GoAround(aircraft) => self.clearance(&aircraft, ParsedCommand::GoAround),
            RpcRequest::DeleteAircraft(aircraft) => {
                self.clearance(&aircraft, ParsedCommand::DeleteAircraft)
            }
            RpcRequest::RunAircraftCommands { aircraft, commands } => ok(self
                .sim(&aircraft.token)?
                .run_aircraft_commands(&aircraft, &commands)),
        }
    }

    fn sim(&self, token: &ControllerToken) -> Result<Arc<Sim>, SimError> {
        self.manager
            .resolve_token(token)
            .ok_or(SimError::NoSimForToken)
    }

    fn clearance(
        &self,
        aircraft: &AircraftSpecifier,
        command: ParsedCommand,
    ) -> Result<RpcResponse, SimError> {
        ok(self.sim(&aircraft.token)?.issue_clearance(aircraft, command))
    }
}

fn ok(result: Result<(), SimError>) -> Result<RpcResponse, SimError> {
    result.map(|()| RpcResponse::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, ServerConfig};
    use tracon_runtime::{HeadingAssignment, NewSimConfiguration, TurnMethod};

    fn dispatcher() -> SimDispatcher {
        let manager = SimManager::new(builtin_catalog().expect("catalog"), &ServerConfig::default());
        SimDispatcher::new(Arc::new(manager))
    }

    fn sign_on(dispatcher: &SimDispatcher) -> ControllerToken {
        match dispatcher
            .dispatch(RpcRequest::NewSim(NewSimConfiguration::create_remote(
                "east", "JFK",
            )))
            .expect("create")
        {
            RpcResponse::NewSim(result) => result.token,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_rejected_before_validation() {
        let dispatcher = dispatcher();
        let stale = AircraftSpecifier::new(ControllerToken::new("stale"), "NOBODY");
        assert_eq!(
            dispatcher.dispatch(RpcRequest::AssignAltitude {
                aircraft: stale,
                altitude: -1,
            }),
            Err(SimError::NoSimForToken)
        );
    }

    #[test]
    fn typed_clearance_reaches_instance() {
        let dispatcher = dispatcher();
        let token = sign_on(&dispatcher);
        let aircraft = AircraftSpecifier::new(token.clone(), "AAL123");
        dispatcher
            .dispatch(RpcRequest::AssignHeading {
                aircraft: aircraft.clone(),
                heading: HeadingAssignment::Heading {
                    heading: 180,
                    turn: TurnMethod::Closest,
                },
            })
            .expect("heading");
        assert_eq!(
            dispatcher.dispatch(RpcRequest::AssignSpeed {
                aircraft,
                speed: 20,
            }),
            Err(SimError::InvalidSpeed(20))
        );

        let update = match dispatcher
            .dispatch(RpcRequest::GetWorldUpdate { token })
            .expect("update")
        {
            RpcResponse::WorldUpdate(update) => update,
            other => panic!("unexpected response {other:?}"),
        };
        assert_eq!(update.aircraft["AAL123"].nav.assigned_heading, Some(180.0));
    }

    #[test]
    fn sign_off_invalidates_every_later_call() {
        let dispatcher = dispatcher();
        let token = sign_on(&dispatcher);
        assert_eq!(
            dispatcher.dispatch(RpcRequest::SignOff {
                token: token.clone()
            }),
            Ok(RpcResponse::Ok)
        );
        assert_eq!(
            dispatcher.dispatch(RpcRequest::TogglePause { token }),
            Err(SimError::NoSimForToken)
        );
    }
}
