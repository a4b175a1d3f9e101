//! Lease acquisition laws, expiry, and mid-stream preemption.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use common::{fixture, fixture_with, text, Step};
use tangent::config::CoreConfig;
use tangent::errors::CoreError;
use tangent::llm::ThinkingSetting;
use tangent::model::{Provider, ProviderBinding, SessionId, UserId};
use tangent::store::LeaseGrant;
use tangent::stream::TurnEvent;
use tangent::workspace::StartTurn;

#[tokio::test]
async fn test_acquire_refresh_release_laws() {
    let fx = fixture().await;
    let store = fx.workspace.store();
    let (project, ref_id) = (&fx.project.project_id, &fx.project.trunk_ref_id);
    let session_a = SessionId::from("a");
    let session_b = SessionId::from("b");

    let grant = store
        .acquire_ref_lease(project, ref_id, &fx.owner, &session_a, 60_000)
        .await
        .unwrap();
    let LeaseGrant::Acquired { expires_at } = grant else {
        panic!("expected acquisition");
    };

    // Re-acquiring as the holder refreshes rather than failing.
    let again = store
        .acquire_ref_lease(project, ref_id, &fx.owner, &session_a, 60_000)
        .await
        .unwrap();
    assert!(again.is_acquired());

    // A competing session sees Busy with the holder.
    let busy = store
        .acquire_ref_lease(project, ref_id, &fx.owner, &session_b, 60_000)
        .await
        .unwrap();
    match busy {
        LeaseGrant::Busy { holder_session, .. } => assert_eq!(holder_session, session_a),
        other => panic!("expected Busy, got {other:?}"),
    }

    // Refresh preserves the holder and extends expiry.
    let extended = store
        .refresh_ref_lease(project, ref_id, &fx.owner, &session_a, 120_000)
        .await
        .unwrap();
    assert!(extended >= expires_at);

    // Refresh by a non-holder fails.
    let err = store
        .refresh_ref_lease(project, ref_id, &fx.owner, &session_b, 60_000)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::LeaseExpired(_)));

    // Releasing a lease the caller does not hold is a silent no-op.
    store
        .release_ref_lease(project, ref_id, &session_b, false)
        .await
        .unwrap();
    assert_eq!(store.list_ref_leases(project).await.unwrap().len(), 1);

    // The holder's release removes it.
    store
        .release_ref_lease(project, ref_id, &session_a, false)
        .await
        .unwrap();
    assert!(store.list_ref_leases(project).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_lease_is_reacquirable() {
    let fx = fixture().await;
    let store = fx.workspace.store();
    let (project, ref_id) = (&fx.project.project_id, &fx.project.trunk_ref_id);

    store
        .acquire_ref_lease(project, ref_id, &fx.owner, &SessionId::from("a"), 50)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The expired row no longer lists and no longer blocks.
    assert!(store.list_ref_leases(project).await.unwrap().is_empty());
    let grant = store
        .acquire_ref_lease(project, ref_id, &fx.owner, &SessionId::from("b"), 60_000)
        .await
        .unwrap();
    assert!(grant.is_acquired());
}

#[tokio::test]
async fn test_force_release_overrides_holder() {
    let fx = fixture().await;
    let store = fx.workspace.store();
    let (project, ref_id) = (&fx.project.project_id, &fx.project.trunk_ref_id);
    store
        .acquire_ref_lease(project, ref_id, &fx.owner, &SessionId::from("a"), 60_000)
        .await
        .unwrap();
    store
        .release_ref_lease(project, ref_id, &SessionId::from("admin"), true)
        .await
        .unwrap();
    assert!(store.list_ref_leases(project).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_busy_ref_rejects_turn_after_wait_window() {
    // Zero wait window: a held lease surfaces immediately as LeaseHeld.
    let config = CoreConfig {
        lease_wait_ms: 0,
        ..CoreConfig::default()
    };
    let fx = fixture_with(
        config,
        ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5"),
    )
    .await;
    fx.workspace
        .store()
        .acquire_ref_lease(
            &fx.project.project_id,
            &fx.project.trunk_ref_id,
            &fx.owner,
            &SessionId::from("other"),
            60_000,
        )
        .await
        .unwrap();

    let err = fx
        .workspace
        .start_turn(StartTurn {
            project: fx.project.project_id.clone(),
            ref_id: fx.project.trunk_ref_id.clone(),
            user: fx.owner.clone(),
            session: SessionId::from("mine"),
            message: "hello".into(),
            thinking: ThinkingSetting::Off,
            web_search: false,
        })
        .await
        .unwrap_err();
    match err {
        CoreError::LeaseHeld { holder_session, .. } => {
            assert_eq!(holder_session, "other");
        }
        other => panic!("expected LeaseHeld, got {other}"),
    }
}

#[tokio::test]
async fn test_gated_write_rejected_while_foreign_lease_live() {
    let fx = fixture().await;
    fx.workspace
        .store()
        .acquire_ref_lease(
            &fx.project.project_id,
            &fx.project.trunk_ref_id,
            &fx.owner,
            &SessionId::from("editor"),
            60_000,
        )
        .await
        .unwrap();

    // A canvas save without the lease session is refused.
    let err = fx
        .workspace
        .explicit_canvas_save(
            &fx.project.project_id,
            &fx.project.trunk_ref_id,
            &fx.owner,
            None,
            "# Draft",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::LeaseHeld { .. }));

    // The same save with the holder's session id passes.
    fx.workspace
        .explicit_canvas_save(
            &fx.project.project_id,
            &fx.project.trunk_ref_id,
            &fx.owner,
            Some(&SessionId::from("editor")),
            "# Draft",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slow_turn_is_preempted_after_ttl() {
    // Scenario: session A's stream outlives its 1s lease; session B takes
    // the lease; A's assistant append lands as interrupted and A sees
    // LeaseExpired.
    let config = CoreConfig {
        lease_ttl_secs: 1,
        // Keep heartbeats out of the way so the lease genuinely lapses.
        heartbeat_interval_ms: 3_600_000,
        ..CoreConfig::default()
    };
    let fx = fixture_with(
        config,
        ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5"),
    )
    .await;

    let gate = Arc::new(Notify::new());
    fx.client.enqueue(vec![
        text("partial "),
        Step::Pause(gate.clone()),
        text("tail"),
    ]);

    let (tx, mut rx) = mpsc::channel::<TurnEvent>(16);
    let workspace = fx.workspace.clone();
    let input = StartTurn {
        project: fx.project.project_id.clone(),
        ref_id: fx.project.trunk_ref_id.clone(),
        user: fx.owner.clone(),
        session: SessionId::from("session-a"),
        message: "slow one".into(),
        thinking: ThinkingSetting::Off,
        web_search: false,
    };
    let handle =
        tokio::spawn(async move { workspace.start_turn_with_events(input, Some(tx)).await });

    // Wait for streaming to start, then let A's TTL elapse.
    loop {
        match rx.recv().await.expect("turn died before streaming") {
            TurnEvent::Chunk(_) => break,
            _ => continue,
        }
    }
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // B displaces the expired lease.
    let user_b = UserId::from("bob");
    fx.workspace
        .add_member(&fx.project.project_id, &fx.owner, &user_b)
        .await
        .unwrap();
    let grant = fx
        .workspace
        .store()
        .acquire_ref_lease(
            &fx.project.project_id,
            &fx.project.trunk_ref_id,
            &user_b,
            &SessionId::from("session-b"),
            60_000,
        )
        .await
        .unwrap();
    assert!(grant.is_acquired());

    // A's stream finishes; its write lands interrupted, then A errors.
    gate.notify_one();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::LeaseExpired(_)));

    let history = fx
        .workspace
        .get_history(
            &fx.project.project_id,
            &fx.owner,
            &fx.project.trunk_ref_id,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(history.entries.len(), 2);
    let assistant = &history.entries[1].node;
    assert_eq!(assistant["interrupted"], true);
    assert_eq!(assistant["content"], "partial tail");

    // B's lease survived A's exit.
    let leases = fx
        .workspace
        .list_leases(&fx.project.project_id)
        .await
        .unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].holder_session, SessionId::from("session-b"));
}
