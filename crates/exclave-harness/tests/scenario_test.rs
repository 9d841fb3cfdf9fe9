//! Directed scenario tests for the mutual-exclusion protocol.
//!
//! Each test replays one interleaving step by step and checks the
//! global invariants after every event.

use exclave_harness::SimWorld;
use exclave_proto::{Message, MutexState};

fn assert_consistent(world: &mut SimWorld) {
    let violations = world.check_invariants();
    assert!(violations.is_empty(), "invariant violations: {violations:?}");
}

#[test]
fn scenario_single_requester_against_idle_peers() {
    // Three idle processes; P0 requests and both peers grant at once.
    let mut world = SimWorld::new(3).unwrap();

    world.enter(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::Wanting);
    assert_eq!(world.engine(0).clock(), 1);
    assert_eq!(world.in_flight().len(), 2);
    assert_consistent(&mut world);

    // Both peers receive the request and reply immediately.
    world.deliver_to(1).unwrap();
    world.deliver_to(2).unwrap();
    assert_consistent(&mut world);
    assert!(
        world
            .in_flight()
            .iter()
            .all(|m| matches!(m.message, Message::Permission { .. }) && m.to == 0)
    );

    // The second reply completes the quorum; exactly one grant.
    world.deliver_to(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::Wanting);
    world.deliver_to(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::InSection);
    assert_eq!(world.grants(0), 1);
    assert_consistent(&mut world);

    world.exit(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::NotWanting);
    assert!(world.in_flight().is_empty());
    assert_consistent(&mut world);
}

#[test]
fn scenario_concurrent_requests_resolve_by_id() {
    // P0 and P1 request at the same logical time; the tie breaks
    // toward the smaller id, so P0 enters first and P1 waits for the
    // deferred permission.
    let mut world = SimWorld::new(3).unwrap();

    world.enter(0).unwrap();
    world.enter(1).unwrap();
    assert_eq!(world.engine(0).request_timestamp(), 1);
    assert_eq!(world.engine(1).request_timestamp(), 1);
    assert_consistent(&mut world);

    // P1's request reaches P0: P0 has priority and defers.
    world.deliver_to(0).unwrap();
    assert!(world.engine(0).deferred()[1]);
    assert_consistent(&mut world);

    // P0's request reaches P1: P1 loses the tie and grants.
    world.deliver_to(1).unwrap();
    assert!(!world.engine(1).deferred()[0]);
    assert_consistent(&mut world);

    // The idle P2 grants both requests.
    world.deliver_to(2).unwrap();
    world.deliver_to(2).unwrap();
    assert_consistent(&mut world);

    // P0 collects its quorum; P1 keeps waiting.
    world.deliver_to(0).unwrap();
    world.deliver_to(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::InSection);
    world.deliver_to(1).unwrap();
    assert_eq!(world.engine(1).state(), MutexState::Wanting);
    assert_eq!(world.grants(1), 0);
    assert_consistent(&mut world);

    // Only P0's exit releases the deferred permission.
    world.exit(0).unwrap();
    world.deliver_to(1).unwrap();
    assert_eq!(world.engine(1).state(), MutexState::InSection);
    assert_eq!(world.grants(1), 1);
    assert_consistent(&mut world);

    world.exit(1).unwrap();
    assert!(world.in_flight().is_empty());
    assert_consistent(&mut world);
}

#[test]
fn scenario_snapshot_round_spans_all_processes() {
    // P0 triggers a snapshot of a quiescent system; every process
    // captures a record for the same round and the records audit
    // clean.
    let mut world = SimWorld::new(3).unwrap();

    world.snapshot(0);
    assert!(world.engine(0).snapshot_active());
    assert_eq!(world.in_flight().len(), 2);

    // First receipt starts a round on each peer and re-broadcasts.
    world.deliver_to(1).unwrap();
    world.deliver_to(2).unwrap();
    assert!(world.engine(1).snapshot_active());
    assert!(world.engine(2).snapshot_active());

    // Remaining markers complete every round.
    while !world.in_flight().is_empty() {
        world.deliver(0).unwrap();
    }

    for p in 0..3 {
        assert!(!world.engine(p).snapshot_active());
        let records = world.records(p);
        assert_eq!(records.len(), 1, "process {p} should have one record");
        assert_eq!(records[0].round, 1);
        assert_eq!(records[0].state, MutexState::NotWanting);
        assert!(records[0].deferred.iter().all(|&flag| !flag));
        assert!(records[0].in_transit.is_empty());
    }
    assert_consistent(&mut world);
}

#[test]
fn scenario_snapshot_during_contention_captures_the_waiter() {
    let mut world = SimWorld::new(2).unwrap();

    // P0 holds the section, P1 waits deferred.
    world.enter(0).unwrap();
    world.deliver_to(1).unwrap();
    world.deliver_to(0).unwrap();
    assert_eq!(world.engine(0).state(), MutexState::InSection);
    world.enter(1).unwrap();
    world.deliver_to(0).unwrap();
    assert!(world.engine(0).deferred()[1]);
    assert_consistent(&mut world);

    world.snapshot(1);
    world.deliver_to(0).unwrap();
    world.deliver_to(1).unwrap();

    let holder = &world.records(0)[0];
    assert_eq!(holder.state, MutexState::InSection);
    assert_eq!(holder.deferred, vec![false, true]);
    let waiter = &world.records(1)[0];
    assert_eq!(waiter.state, MutexState::Wanting);
    assert_consistent(&mut world);
}
