//! Git-notes store round-trip laws through the public API.

use empirica::domain::models::{
    AgentMessage, CheckDecision, Finding, Phase, RecipientEndpoint, Reflex, SenderEndpoint,
    VectorSet,
};
use empirica::gitstore::message_store::StatusFilter;
use empirica::gitstore::{GitNotesStore, GitWorkspace, MessageStore, Namespace};
use uuid::Uuid;

async fn scratch_repo() -> (GitWorkspace, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    for args in [
        vec!["init", "-q"],
        vec!["config", "user.email", "kernel@test"],
        vec!["config", "user.name", "kernel"],
        vec!["commit", "-q", "--allow-empty", "-m", "root"],
    ] {
        let status = tokio::process::Command::new("git")
            .args(&args)
            .current_dir(tmp.path())
            .status()
            .await
            .unwrap();
        assert!(status.success());
    }
    (GitWorkspace::new(tmp.path()), tmp)
}

/// Round-trip law: a finding logged, read back through cat-file plumbing,
/// and JSON-decoded equals the original payload.
#[tokio::test]
async fn test_finding_round_trip_through_plumbing() {
    let (workspace, _tmp) = scratch_repo().await;
    let store = GitNotesStore::new(workspace);

    let finding = Finding::new(Uuid::new_v4(), "OAuth2 module lacks PKCE", 0.8)
        .with_subject("auth");
    store
        .put(Namespace::Findings, &finding.id.to_string(), &finding)
        .await
        .unwrap();

    let loaded: Finding = store
        .get(Namespace::Findings, &finding.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&finding).unwrap()
    );
}

/// The blob is the source of truth: overwriting a ref changes what readers
/// see, with no stale cache in between.
#[tokio::test]
async fn test_forced_overwrite_is_authoritative() {
    let (workspace, _tmp) = scratch_repo().await;
    let store = GitNotesStore::new(workspace);
    let id = Uuid::new_v4().to_string();

    let first = Finding::new(Uuid::new_v4(), "initial view", 0.4);
    store.put(Namespace::Findings, &id, &first).await.unwrap();
    let second = Finding::new(Uuid::new_v4(), "revised view", 0.9);
    store.put(Namespace::Findings, &id, &second).await.unwrap();

    let loaded: Finding = store.get(Namespace::Findings, &id).await.unwrap().unwrap();
    assert_eq!(loaded.finding, "revised view");
}

#[tokio::test]
async fn test_phase_records_and_cascade_log_coexist() {
    let (workspace, _tmp) = scratch_repo().await;
    let store = GitNotesStore::new(workspace);
    let session_id = Uuid::new_v4();

    let reflex = Reflex::new(
        session_id,
        Phase::Preflight,
        1,
        VectorSet::neutral(),
        CheckDecision::Proceed,
        "baseline",
    );
    store.put_phase_record(&reflex).await.unwrap();
    store
        .append_cascade_entry(
            session_id,
            reflex.transaction_id,
            "PREFLIGHT",
            &serde_json::json!({"round": 1}),
        )
        .await
        .unwrap();
    store
        .append_cascade_entry(
            session_id,
            reflex.transaction_id,
            "CHECK",
            &serde_json::json!({"round": 1, "confidence": 0.85}),
        )
        .await
        .unwrap();

    let record = store
        .get_phase_record(session_id, Phase::Preflight, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, reflex.id);

    let log = store
        .read_cascade_log(session_id, reflex.transaction_id)
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].1["confidence"], 0.85);
}

/// Idempotence law: double mark_read yields the same read_by list.
#[tokio::test]
async fn test_double_mark_read_is_stable() {
    let (workspace, _tmp) = scratch_repo().await;
    let store = MessageStore::new(workspace, "host-a");

    let msg = AgentMessage::new(
        SenderEndpoint {
            ai_id: "a1".into(),
            machine: "host-a".into(),
            session_id: None,
        },
        RecipientEndpoint {
            ai_id: "b2".into(),
            machine: None,
        },
        "crosscheck",
        "verify",
        "please double-check",
    );
    store.send(&msg).await.unwrap();

    store.mark_read("crosscheck", msg.message_id, "b2").await.unwrap();
    let after_first = store
        .load("crosscheck", msg.message_id)
        .await
        .unwrap()
        .unwrap()
        .read_by;

    store.mark_read("crosscheck", msg.message_id, "b2").await.unwrap();
    let after_second = store
        .load("crosscheck", msg.message_id)
        .await
        .unwrap()
        .unwrap()
        .read_by;

    assert_eq!(after_first.len(), 1);
    assert_eq!(after_second.len(), after_first.len());
    assert_eq!(after_second[0].ai_id, after_first[0].ai_id);

    let unread = store
        .inbox("b2", None, Some("crosscheck"), StatusFilter::Unread, 50)
        .await
        .unwrap();
    assert!(unread.is_empty());
}
