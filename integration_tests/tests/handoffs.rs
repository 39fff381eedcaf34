mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use tracon_runtime::SimError;

#[test]
fn handoff_accept_and_control_transfer() -> Result<()> {
    let server = common::local_server()?;
    let (_, approach) = common::create(&server, "east")?;
    let departure = common::join(&server, "east", "DEP")?;

    approach.handoff_track("AAL1", "DEP").wait_ok()?;
    assert_eq!(
        common::aircraft(&departure, "AAL1")?.handoff_target.as_deref(),
        Some("DEP")
    );
    departure.accept_handoff("AAL1").wait_ok()?;
    approach.handoff_control("AAL1").wait_ok()?;

    let aircraft = common::aircraft(&departure, "AAL1")?;
    assert_eq!(aircraft.tracking_controller.as_deref(), Some("DEP"));
    assert_eq!(aircraft.controlling_controller.as_deref(), Some("DEP"));

    departure.run_aircraft_commands("AAL1", "C050").wait_ok()?;
    server.shutdown();
    Ok(())
}

#[test]
fn reject_and_cancel_handoffs() -> Result<()> {
    let server = common::local_server()?;
    let (_, approach) = common::create(&server, "east")?;
    let departure = common::join(&server, "east", "DEP")?;

    assert_eq!(
        common::sim_error(departure.accept_handoff("AAL1").wait_ok())?,
        SimError::NotBeingHandedOffToMe("AAL1".to_string())
    );
    approach.handoff_track("AAL1", "DEP").wait_ok()?;
    departure.reject_handoff("AAL1").wait_ok()?;
    assert_eq!(
        common::sim_error(approach.cancel_handoff("AAL1").wait_ok())?,
        SimError::NoHandoffInProgress("AAL1".to_string())
    );

    approach.handoff_track("AAL1", "DEP").wait_ok()?;
    approach.cancel_handoff("AAL1").wait_ok()?;
    assert_eq!(common::aircraft(&approach, "AAL1")?.handoff_target, None);
    server.shutdown();
    Ok(())
}

#[test]
fn untracked_aircraft_can_be_picked_up_once() -> Result<()> {
    let server = common::local_server()?;
    let (_, approach) = common::create(&server, "east")?;
    let center = common::join(&server, "east", "CTR")?;

    center.initiate_track("UAL2").wait_ok()?;
    assert_eq!(
        common::sim_error(approach.initiate_track("UAL2").wait_ok())?,
        SimError::OtherControllerHasTrack("UAL2".to_string())
    );
    center.point_out("UAL2", "APP").wait_ok()?;
    center.set_scratchpad("UAL2", "I4R").wait_ok()?;

    let aircraft = common::aircraft(&approach, "UAL2")?;
    assert_eq!(aircraft.point_out_target.as_deref(), Some("APP"));
    assert_eq!(aircraft.scratchpad, "I4R");

    center.drop_track("UAL2").wait_ok()?;
    assert_eq!(common::aircraft(&approach, "UAL2")?.tracking_controller, None);
    server.shutdown();
    Ok(())
}

#[test]
fn update_loop_moves_aircraft_until_paused() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.set_sim_rate(10.0).wait_ok()?;
    assert_eq!(
        common::sim_error(proxy.set_sim_rate(0.0).wait_ok())?,
        SimError::InvalidSimRate(0.0)
    );

    let start = common::aircraft(&proxy, "AAL1")?.position;
    let deadline = Instant::now() + common::WAIT;
    loop {
        let update = proxy.get_world_update().wait_world_update()?;
        if update.aircraft["AAL1"].position != start {
            break;
        }
        assert!(Instant::now() < deadline, "aircraft never moved");
        std::thread::sleep(Duration::from_millis(20));
    }

    proxy.toggle_pause().wait_ok()?;
    let paused = proxy.get_world_update().wait_world_update()?;
    assert!(paused.paused);
    std::thread::sleep(Duration::from_millis(50));
    let later = proxy.get_world_update().wait_world_update()?;
    assert_eq!(later.aircraft["AAL1"].position, paused.aircraft["AAL1"].position);
    server.shutdown();
    Ok(())
}
