//! Durability across reconnects: a file-backed store must serve the same
//! history, canvas, and ref state after being dropped and reopened.

mod common;

use std::sync::Arc;

use common::{text, ScriptedClient};
use tangent::config::CoreConfig;
use tangent::llm::ThinkingSetting;
use tangent::model::{Provider, ProviderBinding, SessionId, UserId};
use tangent::store::Store;
use tangent::workspace::{StartTurn, Workspace};

#[tokio::test]
async fn test_reopened_store_serves_same_history() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tangent.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let owner = UserId::from("alice");
    let (project_id, trunk_ref_id);
    {
        let store = Store::connect(&url).await.unwrap();
        let client = ScriptedClient::new();
        client.enqueue(vec![text("durable answer")]);
        let workspace = Arc::new(Workspace::new(store, CoreConfig::default(), client.clone()));
        let project = workspace
            .create_project(
                "durable",
                None,
                &owner,
                ProviderBinding::new(Provider::Anthropic, "claude-sonnet-4-5"),
            )
            .await
            .unwrap();
        workspace
            .save_draft(&project.project_id, &project.trunk_ref_id, &owner, "# Kept")
            .await
            .unwrap();
        workspace
            .start_turn(StartTurn {
                project: project.project_id.clone(),
                ref_id: project.trunk_ref_id.clone(),
                user: owner.clone(),
                session: SessionId::from("s1"),
                message: "persist this".into(),
                thinking: ThinkingSetting::Off,
                web_search: false,
            })
            .await
            .unwrap();
        project_id = project.project_id;
        trunk_ref_id = project.trunk_ref_id;
    }

    // Reopen; schema bootstrap must be idempotent and data intact.
    let store = Store::connect(&url).await.unwrap();
    let workspace = Workspace::new(store, CoreConfig::default(), ScriptedClient::new());

    let trunk = workspace
        .store()
        .get_ref(&project_id, &trunk_ref_id)
        .await
        .unwrap();
    assert_eq!(trunk.tip_ordinal, 1);

    let history = workspace
        .get_history(&project_id, &owner, &trunk_ref_id, None, None)
        .await
        .unwrap();
    assert_eq!(history.entries.len(), 2);
    assert_eq!(history.entries[1].node["content"], "durable answer");

    // The promoted artefact survived; the draft (same connection-agnostic
    // table) did too.
    let canvas = workspace
        .get_canvas(&project_id, &trunk_ref_id, &owner)
        .await
        .unwrap();
    assert_eq!(canvas.content, "# Kept");
}
