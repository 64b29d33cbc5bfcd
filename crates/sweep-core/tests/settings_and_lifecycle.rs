//! Settings validation, instance lifecycle and the invalidated guard

use std::time::Duration;

use pretty_assertions::assert_eq;

use sweep_core::{
    EphemeralStore, InstanceKeys, Setting, SettingValue, SweepError, Sweeper, TimerSubsystem,
    ValidationError,
};
use sweep_test_utils::{TestWorld, TEST_NOW};

const SLUG: &str = "abandoned";

fn keys() -> InstanceKeys {
    InstanceKeys::derive(SLUG)
}

async fn active_sweeper(world: &TestWorld, overrides: Vec<(Setting, SettingValue)>) -> Sweeper {
    Sweeper::new(SLUG, overrides, world.capabilities())
        .await
        .expect("construction should succeed")
}

#[tokio::test]
async fn construction_rejects_status_conflict() {
    let world = TestWorld::new();
    // Default target set is ["pending"]; pointing the transition back into it
    // would make every sweep requeue its own output.
    let result = Sweeper::new(
        SLUG,
        vec![(Setting::NewStatus, SettingValue::from("pending"))],
        world.capabilities(),
    )
    .await;

    match result {
        Err(SweepError::InvalidConfiguration(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(
                failures[0],
                ValidationError::StatusConflict { .. }
            ));
        }
        other => panic!("expected configuration failure, got {other:?}"),
    }
    // Nothing was registered for the failed instance.
    assert!(world.timer.schedules().is_empty());
}

#[tokio::test]
async fn status_prefix_is_stripped_on_the_way_in() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(
        &world,
        vec![
            (
                Setting::TargetStatuses,
                SettingValue::from(vec!["wc-pending", "wc-on-hold"]),
            ),
            (Setting::NewStatus, SettingValue::from("wc-cancelled")),
        ],
    )
    .await;

    assert_eq!(
        sweeper.target_statuses(),
        Some(vec!["pending".to_string(), "on-hold".to_string()])
    );
    assert_eq!(sweeper.new_status(), Some("cancelled".to_string()));

    sweeper
        .update(Setting::NewStatus, SettingValue::from("wc-completed"))
        .await
        .expect("update should succeed");
    assert_eq!(sweeper.new_status(), Some("completed".to_string()));
}

#[tokio::test]
async fn scalar_target_becomes_singleton_list() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(
        &world,
        vec![(Setting::TargetStatuses, SettingValue::from("wc-on-hold"))],
    )
    .await;
    assert_eq!(
        sweeper.target_statuses(),
        Some(vec!["on-hold".to_string()])
    );
}

#[tokio::test]
async fn conflicting_update_is_rejected_without_mutating() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(&world, Vec::new()).await;

    // Both directions of the disjointness rule.
    let err = sweeper
        .update(Setting::TargetStatuses, SettingValue::from(vec!["cancelled"]))
        .await
        .expect_err("conflict should be rejected");
    assert!(matches!(
        err,
        SweepError::Validation(ValidationError::StatusConflict { .. })
    ));
    assert_eq!(sweeper.target_statuses(), Some(vec!["pending".to_string()]));

    let err = sweeper
        .update(Setting::NewStatus, SettingValue::from("pending"))
        .await
        .expect_err("conflict should be rejected");
    assert!(matches!(err, SweepError::Validation(_)));
    assert_eq!(sweeper.new_status(), Some("cancelled".to_string()));
}

#[tokio::test]
async fn out_of_range_update_is_rejected_without_mutating() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(&world, Vec::new()).await;

    assert!(sweeper
        .update(Setting::Days, SettingValue::Int(0))
        .await
        .is_err());
    assert_eq!(sweeper.days(), Some(30));

    assert!(sweeper
        .update(Setting::Limit, SettingValue::Int(0))
        .await
        .is_err());
    assert!(sweeper
        .update(Setting::Limit, SettingValue::Int(-2))
        .await
        .is_err());
    assert_eq!(sweeper.limit(), Some(-1));
}

#[tokio::test]
async fn blocked_exceptions_swallow_invalid_updates() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(
        &world,
        vec![(Setting::BlockExceptions, SettingValue::Bool(true))],
    )
    .await;
    assert!(!sweeper.is_invalidated());

    let logs_before = world.sink.logs().len();
    sweeper
        .update(Setting::Days, SettingValue::Int(0))
        .await
        .expect("failure should be swallowed");
    assert_eq!(sweeper.days(), Some(30));
    assert!(world.sink.logs().len() > logs_before);
}

#[tokio::test]
async fn hidden_notices_still_reach_the_log() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(
        &world,
        vec![
            (Setting::HideNotices, SettingValue::Bool(true)),
            (Setting::BlockExceptions, SettingValue::Bool(true)),
        ],
    )
    .await;

    let notices_before = world.sink.notices().len();
    sweeper
        .update(Setting::Days, SettingValue::Int(0))
        .await
        .expect("failure should be swallowed");
    assert_eq!(world.sink.notices().len(), notices_before);
    assert!(!world.sink.logs().is_empty());
}

#[tokio::test]
async fn fatal_construction_with_blocking_yields_invalidated_instance() {
    let world = TestWorld::new();
    let sweeper = Sweeper::new(
        SLUG,
        vec![
            (Setting::BlockExceptions, SettingValue::Bool(true)),
            (Setting::Days, SettingValue::Int(0)),
        ],
        world.capabilities(),
    )
    .await
    .expect("blocking should convert the failure");

    assert!(sweeper.is_invalidated());
    assert_eq!(sweeper.slug(), SLUG);
    assert!(world
        .sink
        .logs()
        .iter()
        .any(|line| line.contains("instance disabled")));
    assert!(world.timer.schedules().is_empty());

    // Every public operation is a guarded no-op.
    assert_eq!(sweeper.days(), None);
    assert_eq!(sweeper.config(), None);
    assert_eq!(sweeper.event_hook(), None);
    assert!(!sweeper.update_orders());
    assert_eq!(sweeper.run_pending().await, None);
    assert_eq!(sweeper.really_update_orders().await, None);
    assert_eq!(sweeper.clear_events().await, None);
    assert_eq!(sweeper.clear_events().await, None);
    sweeper
        .update(Setting::Days, SettingValue::Int(5))
        .await
        .expect("update on invalidated instance is a no-op");
    assert_eq!(sweeper.days(), None);
}

#[tokio::test]
async fn inactive_store_is_configuration_fatal() {
    let world = TestWorld::new();
    world.store.set_active(false);

    let result = Sweeper::new(SLUG, Vec::new(), world.capabilities()).await;
    assert!(matches!(result, Err(SweepError::StoreUnavailable)));

    let blocked = Sweeper::new(
        SLUG,
        vec![(Setting::BlockExceptions, SettingValue::Bool(true))],
        world.capabilities(),
    )
    .await
    .expect("blocking should convert the failure");
    assert!(blocked.is_invalidated());
}

#[tokio::test]
async fn construction_registers_timer_once() {
    let world = TestWorld::new();
    let first = active_sweeper(&world, Vec::new()).await;
    assert_eq!(first.frequency(), Some("daily".to_string()));
    assert_eq!(world.timer.schedules().len(), 1);

    // A second instance over the same slug finds the registration and leaves
    // it alone.
    let _second = active_sweeper(&world, Vec::new()).await;
    assert_eq!(world.timer.schedules().len(), 1);
}

#[tokio::test]
async fn unknown_frequency_is_rejected() {
    let world = TestWorld::new();
    let result = Sweeper::new(
        SLUG,
        vec![(Setting::Frequency, SettingValue::from("fortnightly"))],
        world.capabilities(),
    )
    .await;
    assert!(matches!(result, Err(SweepError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn frequency_update_rebuilds_the_registration() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(&world, Vec::new()).await;
    let event = keys().event_hook().to_string();

    sweeper
        .update(Setting::Frequency, SettingValue::from("hourly"))
        .await
        .expect("update should succeed");

    assert_eq!(world.timer.clears(), vec![event.clone()]);
    assert_eq!(world.timer.schedules().len(), 2);
    assert_eq!(world.timer.frequency_of(&event), Some("hourly".to_string()));

    // Non-schedule fields leave the registration alone.
    sweeper
        .update(Setting::Days, SettingValue::Int(5))
        .await
        .expect("update should succeed");
    assert_eq!(world.timer.schedules().len(), 2);
}

#[tokio::test]
async fn start_accepts_expressions_and_reschedules() {
    let world = TestWorld::new();
    let sweeper = active_sweeper(&world, Vec::new()).await;
    let event = keys().event_hook().to_string();

    sweeper
        .update(Setting::Start, SettingValue::from("+2h"))
        .await
        .expect("update should succeed");
    assert_eq!(sweeper.start(), Some(TEST_NOW + 7_200));
    assert_eq!(
        world.timer.next_fire_time(&event).await,
        Some(TEST_NOW + 7_200)
    );

    // Calendar dates resolve to midnight UTC.
    sweeper
        .update(Setting::Start, SettingValue::from("2023-11-15"))
        .await
        .expect("update should succeed");
    assert_eq!(sweeper.start(), Some(1_700_006_400));
}

#[tokio::test]
async fn update_orders_defers_all_work() {
    let world = TestWorld::new();
    world.seed_aged("pending", 91, 5);
    let sweeper = active_sweeper(
        &world,
        vec![(Setting::Days, SettingValue::Int(90))],
    )
    .await;

    assert!(sweeper.update_orders());
    assert!(sweeper.update_orders());
    assert!(world.store.queries().is_empty());

    // The burst coalesces into a single run.
    let report = sweeper.run_pending().await.expect("run should complete");
    assert_eq!(report.transitioned, 5);
    assert_eq!(world.store.queries().len(), 1);

    assert_eq!(sweeper.run_pending().await, None);
    assert_eq!(world.store.queries().len(), 1);
}

#[tokio::test]
async fn pending_continuation_is_drained_on_boot() {
    let world = TestWorld::new();
    world.seed_aged("pending", 91, 10);
    world
        .kv
        .set_if_absent(keys().continuation_key(), "-1", Duration::from_secs(600))
        .await;

    let sweeper = active_sweeper(
        &world,
        vec![(Setting::Days, SettingValue::Int(90))],
    )
    .await;

    // Construction saw the marker and enqueued one trigger.
    let report = sweeper.run_pending().await.expect("run should complete");
    assert_eq!(report.transitioned, 10);
    assert_eq!(world.kv.get(keys().continuation_key()).await, None);

    assert_eq!(sweeper.run_pending().await, None);
}

#[tokio::test]
async fn clear_events_removes_registration_and_markers() {
    let world = TestWorld::new();
    world.seed_aged("pending", 91, 60);
    let sweeper = active_sweeper(
        &world,
        vec![
            (Setting::Days, SettingValue::Int(90)),
            (Setting::Start, SettingValue::Int(TEST_NOW + 3_600)),
        ],
    )
    .await;

    let report = sweeper
        .really_update_orders()
        .await
        .expect("run should complete");
    assert!(report.continuation_scheduled);

    assert_eq!(sweeper.clear_events().await, Some(()));
    assert_eq!(
        world.timer.next_fire_time(keys().event_hook()).await,
        None
    );
    assert_eq!(world.kv.get(keys().continuation_key()).await, None);
    assert_eq!(world.kv.get(keys().lock_key()).await, None);
}

#[tokio::test]
async fn worker_services_deferred_triggers() {
    let world = TestWorld::new();
    world.seed_aged("pending", 91, 3);
    let sweeper = std::sync::Arc::new(
        active_sweeper(&world, vec![(Setting::Days, SettingValue::Int(90))]).await,
    );

    let handle = sweeper.spawn_worker();
    assert!(sweeper.update_orders());

    // Give the worker a chance to drain the queue.
    for _ in 0..50 {
        if world.store.count_with_status("cancelled") == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(world.store.count_with_status("cancelled"), 3);

    sweeper.shutdown();
    handle.await.expect("worker should stop cleanly");
}
