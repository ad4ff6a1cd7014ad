//! Bus persistence: every published event has a durable row, and the
//! vector leg degrades to a no-op without a backend.

mod common;

use std::sync::Arc;

use anyhow::Result;
use empirica::bus::VectorEventObserver;
use empirica::domain::models::{EpistemicEvent, EventType};
use empirica::domain::ports::{NullEmbeddingProvider, NullVectorBackend};
use serde_json::json;

/// Invariant 8: for every emitted event a row exists with matching
/// session_id and event_type.
#[tokio::test]
async fn test_every_event_has_a_durable_row() -> Result<()> {
    let kernel = common::test_kernel().await;
    let session_id = kernel.session.session_id;

    let published = [
        (EventType::SessionStarted, json!({"prompt": "x"})),
        (EventType::GoalCreated, json!({"goal_id": "g1", "objective": "o"})),
        (EventType::MemoryPressure, json!({"utilization": 0.9})),
        (EventType::BudgetExhausted, json!({"budget_id": "b1"})),
    ];
    for (event_type, data) in &published {
        kernel
            .bus
            .publish(EpistemicEvent::new(*event_type, "test", session_id, data.clone()))
            .await;
    }

    for (event_type, _) in &published {
        let rows = kernel
            .events
            .query_events(Some(session_id), Some(*event_type), None, 10)
            .await?;
        assert!(
            !rows.is_empty(),
            "no persisted row for {}",
            event_type.as_str()
        );
        assert!(rows.iter().all(|r| r.session_id == session_id));
    }
    Ok(())
}

#[tokio::test]
async fn test_query_events_ordering_and_limit() -> Result<()> {
    let kernel = common::test_kernel().await;
    let session_id = kernel.session.session_id;

    for i in 0..5 {
        kernel
            .bus
            .publish(EpistemicEvent::new(
                EventType::PhaseTransition,
                "cascade",
                session_id,
                json!({"round": i}),
            ))
            .await;
    }

    let rows = kernel
        .events
        .query_events(Some(session_id), None, None, 3)
        .await?;
    assert_eq!(rows.len(), 3);
    // Newest first.
    assert!(rows.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    assert_eq!(rows[0].data["round"], 4);
    Ok(())
}

/// A missing vector backend never breaks the cascade: publishing through a
/// kernel wired with null capabilities works and semantic queries return
/// empty enrichment.
#[tokio::test]
async fn test_vector_leg_degrades_gracefully() -> Result<()> {
    let kernel = common::test_kernel_with_vectors(
        Arc::new(NullVectorBackend),
        Arc::new(NullEmbeddingProvider),
    )
    .await;
    let session_id = kernel.session.session_id;

    kernel
        .bus
        .publish(EpistemicEvent::new(
            EventType::SessionStarted,
            "cascade",
            session_id,
            json!({}),
        ))
        .await;

    // Durable leg still recorded the event.
    assert_eq!(kernel.events.count_for_session(session_id).await?, 1);

    let observer = VectorEventObserver::new(
        Arc::new(NullVectorBackend),
        Arc::new(NullEmbeddingProvider),
        "a1",
    );
    let results = observer.query_semantic("anything", 5, None).await;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cross_session_discovery() -> Result<()> {
    let kernel = common::test_kernel_for("a1", "proj").await;
    let session_a = kernel.session.session_id;
    kernel
        .bus
        .publish(EpistemicEvent::new(
            EventType::GoalCompleted,
            "goals",
            session_a,
            json!({"goal_id": "g1"}),
        ))
        .await;

    // Unfiltered queries are the cross-session discovery path; with one
    // session in this database it returns exactly that session's event.
    let all = kernel
        .events
        .query_events(None, Some(EventType::GoalCompleted), None, 50)
        .await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].session_id, session_a);
    Ok(())
}
