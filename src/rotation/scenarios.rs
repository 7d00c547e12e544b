//! Fleet-level rotation scenarios over the in-memory stack.

use chrono::{Duration, Utc};

use crate::domain::{DeviceId, RotationState};
use crate::rotation::CompletionOutcome;
use crate::test_support::{device, TestStack};

fn id(value: &str) -> DeviceId {
    DeviceId::from_str_unchecked(value)
}

fn assert_fleet_invariants(stack: &TestStack) {
    assert!(stack.pending_count() <= 1, "more than one device PENDING");
    for record in stack.devices.all() {
        if matches!(record.rotation_state, RotationState::Ok | RotationState::Queued) {
            assert!(record.cached_secret.is_none(), "{} carries a cached secret while {}", record.id, record.rotation_state);
        }
    }
}

/// Stack with one device PENDING since `attempt_age` ago, rotated through the engine.
async fn stack_with_pending(attempt_age: Duration) -> TestStack {
    let stack = TestStack::new(vec![device("a", RotationState::Queued, Utc::now())]);
    assert!(stack.engine().rotate_next_queued_device().await.unwrap());

    let mut record = stack.device("a");
    record.last_rotation_attempt_at = Some(Utc::now() - attempt_age);
    stack.devices.insert(record);
    stack
}

#[tokio::test]
async fn fleet_trigger_is_idempotent() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("a", RotationState::Ok, now),
        device("b", RotationState::Ok, now),
    ]);
    let engine = stack.engine();

    assert_eq!(engine.trigger_fleet_rotation().await.unwrap(), 2);
    assert_eq!(engine.trigger_fleet_rotation().await.unwrap(), 0);
    assert_fleet_invariants(&stack);
}

#[tokio::test]
async fn stalest_queued_secret_rotates_first() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("b", RotationState::Queued, now - Duration::days(1)),
        device("a", RotationState::Queued, now - Duration::days(10)),
    ]);

    let report = stack.engine().process_cycle(Some(now)).await.unwrap();
    assert_eq!(report.rotated, Some(id("a")));
    assert_eq!(stack.state_of("a"), RotationState::Pending);
    assert_eq!(stack.state_of("b"), RotationState::Queued);
}

#[tokio::test]
async fn equal_secret_age_breaks_tie_by_id() {
    let created = Utc::now() - Duration::days(5);
    let stack = TestStack::new(vec![
        device("zulu", RotationState::Queued, created),
        device("alpha", RotationState::Queued, created),
    ]);

    let report = stack.engine().process_cycle(Some(Utc::now())).await.unwrap();
    assert_eq!(report.rotated, Some(id("alpha")));
}

#[tokio::test]
async fn queued_devices_win_over_timeout_retries() {
    let now = Utc::now();
    let mut stuck = device("stuck", RotationState::Timeout, now - Duration::days(90));
    stuck.last_rotation_attempt_at = Some(now - Duration::days(2));
    let stack = TestStack::new(vec![stuck, device("fresh", RotationState::Queued, now)]);

    let report = stack.engine().process_cycle(Some(now)).await.unwrap();
    assert_eq!(report.rotated, Some(id("fresh")));
}

#[tokio::test]
async fn timeout_restores_previous_secret() {
    let stack = stack_with_pending(Duration::hours(2)).await;
    let client_id = stack.device("a").client_id().unwrap();
    let original = format!("initial-{}", client_id);
    assert_ne!(stack.identity.secret_for(&client_id), Some(original.clone()));

    let report = stack.engine().process_cycle(Some(Utc::now())).await.unwrap();

    assert_eq!(report.timed_out, vec![id("a")]);
    let record = stack.device("a");
    assert_eq!(record.rotation_state, RotationState::Timeout);
    assert!(record.cached_secret.is_none());
    assert_eq!(stack.identity.secret_for(&client_id), Some(original));
}

#[tokio::test]
async fn timed_out_device_is_retried_on_the_same_cycle() {
    let stack = stack_with_pending(Duration::hours(2)).await;

    let report = stack.engine().process_cycle(Some(Utc::now())).await.unwrap();

    // The sweep frees the slot, and with no queue the TIMEOUT device is retried.
    assert_eq!(report.timed_out, vec![id("a")]);
    assert_eq!(report.rotated, Some(id("a")));
    assert_eq!(stack.state_of("a"), RotationState::Pending);
    assert!(stack.device("a").cached_secret.is_some());
    assert_fleet_invariants(&stack);
}

#[tokio::test]
async fn failed_restore_leaves_device_pending() {
    let stack = stack_with_pending(Duration::hours(2)).await;
    let before = stack.device("a");
    stack.identity.fail_set_secret(true);

    let report = stack.engine().process_cycle(Some(Utc::now())).await.unwrap();

    assert_eq!(report.restore_failures, vec![id("a")]);
    assert!(report.timed_out.is_empty());
    assert_eq!(report.rotated, None);
    assert_eq!(stack.device("a"), before);
    assert!(stack.device("a").cached_secret.is_some());
}

#[tokio::test]
async fn pending_within_timeout_is_left_alone() {
    let stack = stack_with_pending(Duration::minutes(5)).await;

    let report = stack.engine().process_cycle(Some(Utc::now())).await.unwrap();
    assert!(report.timed_out.is_empty());
    assert_eq!(stack.state_of("a"), RotationState::Pending);
    assert_eq!(stack.identity.set_secret_calls(), 0);
}

#[tokio::test]
async fn completion_tolerance_boundary() {
    let within = stack_with_pending(Duration::zero()).await;
    let record = within.device("a");
    let attempt = record.last_rotation_attempt_at.unwrap();
    let outcome = within
        .detector()
        .on_config_fetch(&record, Some(attempt - Duration::seconds(29)))
        .await;
    assert_eq!(outcome, CompletionOutcome::Completed { chained: None });
    assert_eq!(within.state_of("a"), RotationState::Ok);

    let outside = stack_with_pending(Duration::zero()).await;
    let record = outside.device("a");
    let attempt = record.last_rotation_attempt_at.unwrap();
    let outcome = outside
        .detector()
        .on_config_fetch(&record, Some(attempt - Duration::seconds(31)))
        .await;
    assert_eq!(outcome, CompletionOutcome::NotProven);
    assert_eq!(outside.state_of("a"), RotationState::Pending);
}

#[tokio::test]
async fn completion_clears_cache_and_advances_secret_age() {
    let stack = stack_with_pending(Duration::zero()).await;
    let before = stack.device("a");

    stack.detector().on_config_fetch(&before, Some(Utc::now())).await;

    let after = stack.device("a");
    assert_eq!(after.rotation_state, RotationState::Ok);
    assert!(after.cached_secret.is_none());
    assert!(after.last_rotation_completed_at.is_some());
    assert!(after.secret_created_at > before.secret_created_at);
}

#[tokio::test]
async fn end_to_end_fleet_wave() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("a", RotationState::Ok, now - Duration::days(3)),
        device("b", RotationState::Ok, now - Duration::days(30)),
        device("c", RotationState::Ok, now - Duration::days(7)),
    ]);
    let engine = stack.engine();

    assert_eq!(engine.trigger_fleet_rotation().await.unwrap(), 3);

    let first = engine.process_cycle(Some(now)).await.unwrap();
    assert_eq!(first.rotated, Some(id("b")));
    assert_eq!(stack.state_of("b"), RotationState::Pending);
    assert_fleet_invariants(&stack);

    let second = engine.process_cycle(Some(now)).await.unwrap();
    assert_eq!(second.rotated, None);
    assert_eq!(stack.identity.regenerate_calls(), 1);
    assert_eq!(stack.state_of("a"), RotationState::Queued);
    assert_eq!(stack.state_of("c"), RotationState::Queued);
    assert_fleet_invariants(&stack);
}

#[tokio::test]
async fn completion_chains_next_rotation_exactly_once() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("a", RotationState::Queued, now - Duration::days(20)),
        device("b", RotationState::Queued, now - Duration::days(10)),
        device("c", RotationState::Queued, now - Duration::days(5)),
    ]);
    let engine = stack.engine();
    engine.process_cycle(Some(now)).await.unwrap();
    assert_eq!(stack.identity.regenerate_calls(), 1);

    let outcome = stack.detector().on_config_fetch(&stack.device("a"), Some(Utc::now())).await;

    assert_eq!(outcome, CompletionOutcome::Completed { chained: Some(id("b")) });
    assert_eq!(stack.identity.regenerate_calls(), 2);
    assert_eq!(stack.state_of("a"), RotationState::Ok);
    assert_eq!(stack.state_of("b"), RotationState::Pending);
    assert_eq!(stack.state_of("c"), RotationState::Queued);
    assert_eq!(stack.notifier.published_for(), vec![id("a"), id("b")]);
    assert_fleet_invariants(&stack);
}

#[tokio::test]
async fn chain_failure_keeps_completion() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("a", RotationState::Queued, now - Duration::days(20)),
        device("b", RotationState::Queued, now - Duration::days(10)),
    ]);
    stack.engine().process_cycle(Some(now)).await.unwrap();
    stack.identity.fail_regenerate(true);

    let outcome = stack.detector().on_config_fetch(&stack.device("a"), Some(Utc::now())).await;

    assert_eq!(outcome, CompletionOutcome::Completed { chained: None });
    assert_eq!(stack.state_of("a"), RotationState::Ok);
    assert_eq!(stack.state_of("b"), RotationState::Queued);
    assert!(stack.device("b").cached_secret.is_none());
}

#[tokio::test]
async fn full_wave_drains_the_queue() {
    let now = Utc::now();
    let stack = TestStack::new(vec![
        device("a", RotationState::Ok, now - Duration::days(9)),
        device("b", RotationState::Ok, now - Duration::days(8)),
        device("c", RotationState::Ok, now - Duration::days(7)),
    ]);
    let engine = stack.engine();
    let detector = stack.detector();

    engine.trigger_fleet_rotation().await.unwrap();
    engine.process_cycle(Some(now)).await.unwrap();

    for expected in ["a", "b", "c"] {
        assert_eq!(stack.state_of(expected), RotationState::Pending);
        detector.on_config_fetch(&stack.device(expected), Some(Utc::now())).await;
        assert_fleet_invariants(&stack);
    }

    let status = engine.get_status().await.unwrap();
    assert_eq!(status.counts.ok, 3);
    assert!(status.pending_device_id.is_none());
    assert!(status.last_completed_at.is_some());
}

#[tokio::test]
async fn concurrent_cycles_never_start_two_rotations() {
    let now = Utc::now();
    let stack = TestStack::new(
        (0..6).map(|n| device(&format!("d{}", n), RotationState::Queued, now)).collect(),
    );
    let engine = stack.engine();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_cycle(Some(now)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(stack.pending_count(), 1);
    assert_eq!(stack.identity.regenerate_calls(), 1);
}
