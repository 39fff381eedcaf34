mod common;

use anyhow::Result;
use tracon_runtime::{ApproachClearance, SimError, TurnMethod};

#[test]
fn single_heading_token() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.run_aircraft_commands("AAL1", "H180").wait_ok()?;

    let aircraft = common::aircraft(&proxy, "AAL1")?;
    assert_eq!(aircraft.nav.assigned_heading, Some(180.0));
    assert_eq!(aircraft.nav.turn, TurnMethod::Closest);
    server.shutdown();
    Ok(())
}

#[test]
fn failure_keeps_prefix_and_reports_remainder() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    let err = common::sim_error(
        proxy
            .run_aircraft_commands("AAL1", "C080 L20D QZ S210")
            .wait_ok(),
    )?;
    match err {
        SimError::CommandExecution { cause, remaining } => {
            assert_eq!(*cause, SimError::InvalidCommandSyntax);
            assert_eq!(remaining, vec!["QZ".to_string(), "S210".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let aircraft = common::aircraft(&proxy, "AAL1")?;
    assert_eq!(aircraft.nav.assigned_altitude, Some(8000));
    assert_eq!(aircraft.nav.turn, TurnMethod::Left);
    assert_eq!(aircraft.nav.assigned_speed, None);
    server.shutdown();
    Ok(())
}

#[test]
fn direct_requires_known_fix() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.run_aircraft_commands("AAL1", "DOSIS").wait_ok()?;
    assert_eq!(
        common::aircraft(&proxy, "AAL1")?.nav.direct_fix.as_deref(),
        Some("OSIS")
    );

    let err = common::sim_error(proxy.run_aircraft_commands("AAL1", "DZZZZ").wait_ok())?;
    assert_eq!(err.remaining(), ["DZZZZ".to_string()]);
    server.shutdown();
    Ok(())
}

#[test]
fn straight_in_approach_shorthand() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.run_aircraft_commands("AAL1", "CSIILS28").wait_ok()?;

    let aircraft = common::aircraft(&proxy, "AAL1")?;
    assert_eq!(
        aircraft.nav.cleared_approach,
        Some(ApproachClearance {
            approach: "ILS28".to_string(),
            straight_in: true,
        })
    );
    assert_eq!(aircraft.nav.direct_fix.as_deref(), Some("OSIS"));
    server.shutdown();
    Ok(())
}

#[test]
fn commands_need_radio_control() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    let err = common::sim_error(proxy.run_aircraft_commands("UAL2", "H090").wait_ok())?;
    match err {
        SimError::CommandExecution { cause, .. } => {
            assert_eq!(*cause, SimError::NotTrackedByMe("UAL2".to_string()))
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        common::sim_error(proxy.run_aircraft_commands("NOPE1", "H090").wait_ok())?,
        SimError::NoAircraft("NOPE1".to_string())
    );
    server.shutdown();
    Ok(())
}

#[test]
fn typed_clearances_over_the_wire() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.cross_fix_at("AAL1", "CAMRN", Some(4000), None).wait_ok()?;
    proxy.expect_approach("AAL1", "I4R").wait_ok()?;
    assert_eq!(
        common::sim_error(proxy.expect_approach("AAL1", "VOR9").wait_ok())?,
        SimError::UnknownApproach("VOR9".to_string())
    );
    assert_eq!(
        common::sim_error(proxy.set_temporary_altitude("AAL1", 90_000).wait_ok())?,
        SimError::InvalidAltitude(90_000)
    );

    let aircraft = common::aircraft(&proxy, "AAL1")?;
    assert_eq!(aircraft.nav.expected_approach.as_deref(), Some("I4R"));
    assert_eq!(aircraft.nav.target_altitude(), Some(4000));

    proxy.delete_aircraft("AAL1").wait_ok()?;
    let update = proxy.get_world_update().wait_world_update()?;
    assert!(!update.aircraft.contains_key("AAL1"));
    server.shutdown();
    Ok(())
}
