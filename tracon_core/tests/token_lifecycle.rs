use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tracon_core::{builtin_catalog, ServerConfig, SimManager};
use tracon_runtime::{NewSimConfiguration, NewSimResult, SimError};

/// Once a sign-off returns, no concurrent lookup may resolve the token again.
#[test]
fn sign_off_is_observed_by_concurrent_lookups() {
    let manager = Arc::new(SimManager::new(
        builtin_catalog().expect("catalog"),
        &ServerConfig::default(),
    ));
    let created = manager
        .create_or_join(&NewSimConfiguration::create_remote("east", "JFK"))
        .expect("create");
    let signed_off = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let signed_off = Arc::clone(&signed_off);
            let token = created.token.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let done = signed_off.load(Ordering::Acquire);
                    let resolved = manager.resolve_token(&token).is_some();
                    if done {
                        assert!(!resolved, "token resolved after sign-off completed");
                    }
                }
            })
        })
        .collect();

    manager.sign_off(&created.token).expect("sign off");
    signed_off.store(true, Ordering::Release);

    for reader in readers {
        reader.join().expect("reader");
    }
    assert!(manager.resolve_token(&created.token).is_none());
}

#[test]
fn distinct_positions_get_distinct_tokens() {
    let manager = SimManager::new(builtin_catalog().expect("catalog"), &ServerConfig::default());
    let first = manager
        .create_or_join(&NewSimConfiguration::create_remote("east", "JFK"))
        .expect("create");
    let second = manager
        .create_or_join(&NewSimConfiguration::join("east", "JFK_DEP"))
        .expect("join");
    assert_ne!(first.token, second.token);

    let first_sim = manager.resolve_token(&first.token).expect("first");
    let second_sim = manager.resolve_token(&second.token).expect("second");
    assert!(Arc::ptr_eq(&first_sim, &second_sim));
}

fn join_together(
    manager: &Arc<SimManager>,
    positions: &[&str],
) -> Vec<Result<NewSimResult, SimError>> {
    let barrier = Arc::new(Barrier::new(positions.len()));
    let joiners: Vec<_> = positions
        .iter()
        .map(|position| {
            let manager = Arc::clone(manager);
            let barrier = Arc::clone(&barrier);
            let request = NewSimConfiguration::join("east", *position);
            thread::spawn(move || {
                barrier.wait();
                manager.create_or_join(&request)
            })
        })
        .collect();
    joiners
        .into_iter()
        .map(|joiner| joiner.join().expect("joiner"))
        .collect()
}

#[test]
fn concurrent_sign_ons_at_different_positions_both_succeed() {
    let manager = Arc::new(SimManager::new(
        builtin_catalog().expect("catalog"),
        &ServerConfig::default(),
    ));
    manager
        .create_or_join(&NewSimConfiguration::create_remote("east", "JFK"))
        .expect("create");

    let results = join_together(&manager, &["JFK_DEP", "LGA_APP"]);
    let tokens: Vec<_> = results
        .into_iter()
        .map(|result| result.expect("join").token)
        .collect();
    assert_ne!(tokens[0], tokens[1]);
    assert_eq!(manager.live_tokens(), 3);
    assert!(manager.list_active_sims()["east"].available_positions.is_empty());
}

#[test]
fn racing_sign_ons_for_one_position_admit_exactly_one() {
    let manager = Arc::new(SimManager::new(
        builtin_catalog().expect("catalog"),
        &ServerConfig::default(),
    ));
    manager
        .create_or_join(&NewSimConfiguration::create_remote("east", "JFK"))
        .expect("create");

    let results = join_together(&manager, &["JFK_DEP"; 8]);
    let admitted = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(admitted, 1);
    for result in results.iter().filter_map(|result| result.as_ref().err()) {
        assert_eq!(result, &SimError::PositionOccupied("JFK_DEP".to_string()));
    }
    assert_eq!(manager.live_tokens(), 2);
}
