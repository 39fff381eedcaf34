mod common;

use anyhow::Result;
use tracon_runtime::{NewSimConfiguration, SimError};

#[test]
fn catalog_matches_fixture() -> Result<()> {
    let server = common::local_server()?;
    let fixture: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(common::fixture_path())?)?;
    let expected: Vec<&String> = fixture.as_object().map(|o| o.keys().collect()).unwrap_or_default();
    let offered: Vec<&String> = server.server().configurations().keys().collect();
    assert_eq!(offered, expected);
    server.shutdown();
    Ok(())
}

#[test]
fn join_lists_and_rejects_occupied_positions() -> Result<()> {
    let server = common::local_server()?;
    let (world, _primary) = common::create(&server, "east")?;
    assert!(world.controllers.contains("APP"));

    let active = server.server().list_active_sims()?;
    let east = &active["east"];
    assert_eq!(east.configuration, "TEST");
    assert_eq!(
        east.available_positions.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["CTR", "DEP"]
    );

    let departure = common::join(&server, "east", "DEP")?;
    let occupied = server
        .server()
        .new_sim(NewSimConfiguration::join("east", "DEP"))
        .map(|_| ());
    assert_eq!(
        common::sim_error(occupied)?,
        SimError::PositionOccupied("DEP".to_string())
    );
    let missing = server
        .server()
        .new_sim(NewSimConfiguration::join("east", "TWR"))
        .map(|_| ());
    assert_eq!(
        common::sim_error(missing)?,
        SimError::NoController("TWR".to_string())
    );

    departure.sign_off()?;
    let active = server.server().list_active_sims()?;
    assert!(active["east"].available_positions.contains("DEP"));
    server.shutdown();
    Ok(())
}

#[test]
fn duplicate_names_conflict_but_empty_names_do_not() -> Result<()> {
    let server = common::local_server()?;
    common::create(&server, "east")?;
    let duplicate = server
        .server()
        .new_sim(NewSimConfiguration::create_remote("east", "SOLO"))
        .map(|_| ());
    assert_eq!(
        common::sim_error(duplicate)?,
        SimError::DuplicateName("east".to_string())
    );

    let (_, first) = server
        .server()
        .new_sim(NewSimConfiguration::create_local("SOLO"))?;
    let (_, second) = server
        .server()
        .new_sim(NewSimConfiguration::create_local("SOLO"))?;
    assert_ne!(first.token(), second.token());
    assert_eq!(server.server().list_active_sims()?.len(), 1);
    server.shutdown();
    Ok(())
}

#[test]
fn signed_off_token_is_dead_for_every_call() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    proxy.sign_off()?;

    assert_eq!(
        common::sim_error(proxy.get_world_update().wait())?,
        SimError::NoSimForToken
    );
    assert_eq!(
        common::sim_error(proxy.serialize_sim())?,
        SimError::NoSimForToken
    );
    assert_eq!(common::sim_error(proxy.sign_off())?, SimError::NoSimForToken);
    server.shutdown();
    Ok(())
}

#[test]
fn change_position_moves_session_and_reissues_token() -> Result<()> {
    let server = common::local_server()?;
    let (_, mut proxy) = common::create(&server, "east")?;
    let original = proxy.token().clone();

    proxy.change_control_position("CTR", true)?;
    assert_ne!(proxy.token(), &original);
    let aircraft = common::aircraft(&proxy, "AAL1")?;
    assert_eq!(aircraft.tracking_controller.as_deref(), Some("CTR"));

    let active = server.server().list_active_sims()?;
    assert!(active["east"].available_positions.contains("APP"));
    assert!(!active["east"].available_positions.contains("CTR"));
    server.shutdown();
    Ok(())
}

#[test]
fn snapshot_carries_world_and_digest() -> Result<()> {
    let server = common::local_server()?;
    let (_, proxy) = common::create(&server, "east")?;
    let snapshot = proxy.serialize_sim()?;
    assert_eq!(snapshot.name, "east");
    assert_eq!(snapshot.configuration, "TEST");
    assert_eq!(snapshot.header.aircraft_count, 2);
    assert_eq!(
        tracon_runtime::hash_snapshot(&snapshot)?,
        snapshot.header.hash
    );
    server.shutdown();
    Ok(())
}
