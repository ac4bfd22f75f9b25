mod common;

use apim_controller::lock::lock_key;
use apim_controller::{
    ControllerError, GatewayRepository, LockMode, ReleaseHistoryStore, ReleaseWorker,
};
use apim_types::{EventStatus, PublishSource, PublishStep, ReleaseStatus};
use common::{host, World};
use std::time::Duration;

#[tokio::test]
async fn sync_publish_releases_and_moves_pointer() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, _jobs) = world.trigger();

    let history = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("publish should run");

    assert_eq!(history.status, ReleaseStatus::Success, "{}", history.message);
    let release = world
        .repo
        .get_release(demo.stage_id)
        .await
        .expect("lookup should work")
        .expect("release should exist");
    assert_eq!(release.resource_version_id, demo.version_id);
    assert_eq!(world.keys("/apim/shared/demo/prod/").await.len(), 3);

    let steps: Vec<_> = world
        .history
        .events(history.id)
        .await
        .expect("events should load")
        .into_iter()
        .map(|e| e.step)
        .collect();
    assert_eq!(
        steps,
        vec![
            PublishStep::ValidateConfiguration,
            PublishStep::ReleaseUpgrading,
            PublishStep::ConfigUpdating,
        ]
    );
}

#[tokio::test]
async fn empty_backend_hosts_fail_at_validation() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", Vec::new());
    let (trigger, _jobs) = world.trigger();

    let history = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("failure is recorded, not raised");

    assert_eq!(history.status, ReleaseStatus::Failure);
    assert!(history.message.contains("users"), "{}", history.message);

    let events = world.history.events(history.id).await.expect("events should load");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].step, PublishStep::ValidateConfiguration);
    assert_eq!(events[0].status, EventStatus::Failure);

    assert!(world
        .repo
        .get_release(demo.stage_id)
        .await
        .expect("lookup should work")
        .is_none());
    assert!(world.store.is_empty().await);
    assert!(!world.lock.is_locked(&lock_key(demo.gateway_id, demo.stage_id)));
}

#[tokio::test]
async fn failed_release_keeps_previous_pointer_and_keys() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, _jobs) = world.trigger();

    let first = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("publish should run");
    assert_eq!(first.status, ReleaseStatus::Success);
    let keys_before = world.keys("/apim/shared/").await;

    world.set_hosts(demo.stage_id, demo.backend_id, Vec::new());
    let second = trigger
        .trigger_publish(
            PublishSource::BackendUpdate,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            None,
            true,
        )
        .await
        .expect("publish should run");

    assert_eq!(second.status, ReleaseStatus::Failure);
    let release = world
        .repo
        .get_release(demo.stage_id)
        .await
        .expect("lookup should work")
        .expect("release should still exist");
    assert_eq!(release.resource_version_id, demo.version_id);
    assert_eq!(release.updated_by, "admin");
    assert_eq!(world.keys("/apim/shared/").await, keys_before);
}

#[tokio::test]
async fn user_publish_fails_fast_on_a_held_lock() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, _jobs) = world.trigger();

    let held = world
        .locker()
        .acquire(demo.gateway_id, demo.stage_id, LockMode::NonBlocking)
        .await
        .expect("lock should be free");

    let result = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await;
    assert!(matches!(result, Err(ControllerError::LockTimeout(_))));

    let histories = world
        .history
        .list_for_stage(demo.gateway_id, demo.stage_id)
        .await
        .expect("histories should load");
    assert_eq!(histories.len(), 1);
    assert_eq!(histories[0].status, ReleaseStatus::Failure);
    assert!(world
        .history
        .events(histories[0].id)
        .await
        .expect("events should load")
        .is_empty());
    assert!(world.store.is_empty().await);

    drop(held);
    let retried = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("lock is free again");
    assert_eq!(retried.status, ReleaseStatus::Success);
}

#[tokio::test]
async fn other_stages_do_not_contend() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let other = world.add_gateway(2, "other", vec![host("10.0.0.2:8080")]);
    let (trigger, _jobs) = world.trigger();

    let _held = world
        .locker()
        .acquire(other.gateway_id, other.stage_id, LockMode::NonBlocking)
        .await
        .expect("lock should be free");

    let history = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("publish should run");
    assert_eq!(history.status, ReleaseStatus::Success);
}

#[tokio::test]
async fn finished_history_never_moves_again() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, _jobs) = world.trigger();

    let history = trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("publish should run");

    for next in [
        ReleaseStatus::Pending,
        ReleaseStatus::Releasing,
        ReleaseStatus::Failure,
        ReleaseStatus::Unreleased,
    ] {
        let result = world.history.transition(history.id, next, "").await;
        assert!(
            matches!(result, Err(ControllerError::InvalidTransition { .. })),
            "success -> {next}"
        );
    }
}

#[tokio::test]
async fn async_publish_returns_pending_and_worker_finishes_it() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, jobs) = world.trigger();
    let worker = tokio::spawn(ReleaseWorker::new(world.orchestrator()).run(jobs));

    let queued = trigger
        .trigger_publish(
            PublishSource::StageUpdate,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            false,
        )
        .await
        .expect("publish should queue");
    assert_eq!(queued.status, ReleaseStatus::Pending);

    let mut finished = None;
    for _ in 0..100 {
        let current = world
            .history
            .get(queued.id)
            .await
            .expect("history should load")
            .expect("history should exist");
        if current.status.is_terminal() {
            finished = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let finished = finished.expect("queued release should finish");
    assert_eq!(finished.status, ReleaseStatus::Success, "{}", finished.message);

    drop(trigger);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker should stop once triggers are gone")
        .expect("worker should not panic");
}

#[tokio::test]
async fn revoke_clears_stage_and_ends_unreleased() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let (trigger, _jobs) = world.trigger();

    trigger
        .trigger_publish(
            PublishSource::VersionPublish,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            Some(demo.version_id),
            true,
        )
        .await
        .expect("publish should run");

    let revoked = trigger
        .trigger_revoke(
            PublishSource::StageDisable,
            "admin",
            demo.gateway_id,
            demo.stage_id,
            true,
        )
        .await
        .expect("revoke should run");

    assert_eq!(revoked.status, ReleaseStatus::Unreleased, "{}", revoked.message);
    assert!(world.keys("/apim/shared/demo/prod/").await.is_empty());
    assert!(world
        .repo
        .get_release(demo.stage_id)
        .await
        .expect("lookup should work")
        .is_none());
}
