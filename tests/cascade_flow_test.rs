//! End-to-end cascade scenarios: calibrated loop, overconfidence detection,
//! recalibration loop, and phase-violation gating.

mod common;

use empirica::domain::errors::KernelError;
use empirica::domain::models::{
    CalibrationVerdict, CheckDecision, EventType, Finding, Phase, VectorName, VectorSet,
};

/// Scenario A: well-calibrated loop.
///
/// PREFLIGHT at neutral baseline, one confident CHECK, a logged finding,
/// then POSTFLIGHT matching the CHECK confidence.
#[tokio::test]
async fn test_well_calibrated_loop() {
    let kernel = common::test_kernel().await;
    let session_id = kernel.session.session_id;

    let mut cascade = kernel
        .cascade
        .start_cascade(session_id, "Refactor auth", None)
        .await
        .unwrap();
    assert_eq!(cascade.phase, Phase::Preflight);
    assert_eq!(cascade.cycle, 0);

    // Reflex #1 written with all-neutral vectors.
    let reflexes = kernel.sessions.reflexes(session_id).await.unwrap();
    assert_eq!(reflexes.len(), 1);
    assert_eq!(reflexes[0].phase, Phase::Preflight);
    assert_eq!(reflexes[0].vectors.get(VectorName::Know), 0.5);

    // session_started landed in the event log.
    let events = kernel
        .events
        .query_events(Some(session_id), Some(EventType::SessionStarted), None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    // CHECK at 0.85 proceeds.
    let outcome = kernel
        .cascade
        .submit_check(&mut cascade, "read auth.py", 0.85, vec![], None)
        .await
        .unwrap();
    assert_eq!(outcome.decision, CheckDecision::Proceed);
    assert!(outcome.next_targets.is_empty());

    kernel
        .artifacts
        .log_finding(&Finding::new(session_id, "OAuth2 module lacks PKCE", 0.8))
        .await
        .unwrap();

    kernel
        .cascade
        .record_act(&mut cascade, "added PKCE", None)
        .await
        .unwrap();

    // POSTFLIGHT: know 0.85, uncertainty 0.15 → confidence 0.85, gap 0.
    let postflight = VectorSet::neutral()
        .with(VectorName::Know, 0.85)
        .with(VectorName::Uncertainty, 0.15);
    let report = kernel
        .cascade
        .submit_postflight(
            &mut cascade,
            "added PKCE",
            postflight,
            "learned OAuth2 PKCE flow",
        )
        .await
        .unwrap();

    assert_eq!(report.verdict, CalibrationVerdict::WellCalibrated);
    assert!(report.calibration_gap.abs() < 1e-9);
    assert!((report.delta_from_preflight["know"] - 0.35).abs() < 1e-9);
    assert!(cascade.closed);

    // Full audit trail: PREFLIGHT, CHECK, ACT, POSTFLIGHT.
    let reflexes = kernel.sessions.reflexes(session_id).await.unwrap();
    let phases: Vec<Phase> = reflexes.iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![Phase::Preflight, Phase::Check, Phase::Act, Phase::Postflight]
    );

    let postflight_events = kernel
        .events
        .query_events(Some(session_id), Some(EventType::PostflightComplete), None, 10)
        .await
        .unwrap();
    assert_eq!(postflight_events.len(), 1);
}

/// Scenario B: overconfidence detection. CHECK said 0.9, reality was 0.6.
#[tokio::test]
async fn test_overconfidence_detected() {
    let kernel = common::test_kernel().await;
    let session_id = kernel.session.session_id;

    let mut cascade = kernel
        .cascade
        .start_cascade(session_id, "Ship the migration", None)
        .await
        .unwrap();

    kernel
        .cascade
        .submit_check(&mut cascade, "skimmed the schema", 0.9, vec![], None)
        .await
        .unwrap();
    kernel
        .cascade
        .record_act(&mut cascade, "ran migration", None)
        .await
        .unwrap();

    let postflight = VectorSet::neutral().with(VectorName::Uncertainty, 0.4);
    let report = kernel
        .cascade
        .submit_postflight(&mut cascade, "migration needed two fixups", postflight, "")
        .await
        .unwrap();

    assert_eq!(report.verdict, CalibrationVerdict::Overconfident);
    assert!((report.calibration_gap - 0.3).abs() < 1e-9);

    // Drift event published for the context manager to react to.
    let drift = kernel
        .events
        .query_events(
            Some(session_id),
            Some(EventType::CalibrationDriftDetected),
            None,
            10,
        )
        .await
        .unwrap();
    assert_eq!(drift.len(), 1);
}

/// Scenario C: recalibration loop. Low-confidence CHECKs investigate with
/// suggested targets until the cycle cap forces escalation.
#[tokio::test]
async fn test_recalibration_loop_escalates() {
    let kernel = common::test_kernel().await;
    let session_id = kernel.session.session_id;

    let mut cascade = kernel
        .cascade
        .start_cascade(session_id, "Untangle the scheduler", None)
        .await
        .unwrap();

    for expected_cycle in 1..=3 {
        let outcome = kernel
            .cascade
            .submit_check(
                &mut cascade,
                "still unclear",
                0.5,
                vec!["file x unclear".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision, CheckDecision::Investigate);
        assert_eq!(outcome.cycle, expected_cycle);
        assert_eq!(outcome.next_targets, vec!["Read relevant source files"]);
    }

    // Fourth round still investigates; fifth hits the cap and escalates.
    let fourth = kernel
        .cascade
        .submit_check(&mut cascade, "still unclear", 0.5, vec![], None)
        .await
        .unwrap();
    assert_eq!(fourth.decision, CheckDecision::Investigate);

    let fifth = kernel
        .cascade
        .submit_check(&mut cascade, "still unclear", 0.5, vec![], None)
        .await
        .unwrap();
    assert_eq!(fifth.cycle, 5);
    assert_eq!(fifth.decision, CheckDecision::Escalate);

    // ACT is blocked while the gate says escalate.
    let err = kernel
        .cascade
        .record_act(&mut cascade, "forcing it", None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::PhaseViolation(_)));
}

/// At the cycle cap with moderate confidence the gate allows a caveated
/// proceed instead of escalating.
#[tokio::test]
async fn test_max_cycles_with_moderate_confidence_proceeds_with_caveat() {
    let kernel = common::test_kernel().await;
    let mut cascade = kernel
        .cascade
        .start_cascade(kernel.session.session_id, "Tune the cache", None)
        .await
        .unwrap();

    for _ in 1..=4 {
        kernel
            .cascade
            .submit_check(&mut cascade, "digging", 0.5, vec![], None)
            .await
            .unwrap();
    }
    let fifth = kernel
        .cascade
        .submit_check(&mut cascade, "good enough picture", 0.65, vec![], None)
        .await
        .unwrap();
    assert_eq!(fifth.decision, CheckDecision::ProceedWithCaveat);

    kernel
        .cascade
        .record_act(&mut cascade, "tuned with caveats", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_postflight_is_terminal() {
    let kernel = common::test_kernel().await;
    let mut cascade = kernel
        .cascade
        .start_cascade(kernel.session.session_id, "Small fix", None)
        .await
        .unwrap();

    kernel
        .cascade
        .submit_check(&mut cascade, "looked", 0.9, vec![], None)
        .await
        .unwrap();
    kernel
        .cascade
        .submit_postflight(&mut cascade, "done", VectorSet::neutral(), "")
        .await
        .unwrap();

    // Every phase operation is refused after close.
    assert!(matches!(
        kernel
            .cascade
            .submit_check(&mut cascade, "again", 0.9, vec![], None)
            .await,
        Err(KernelError::PhaseViolation(_))
    ));
    assert!(matches!(
        kernel.cascade.record_act(&mut cascade, "again", None).await,
        Err(KernelError::PhaseViolation(_))
    ));
    assert!(matches!(
        kernel
            .cascade
            .submit_postflight(&mut cascade, "again", VectorSet::neutral(), "")
            .await,
        Err(KernelError::PhaseViolation(_))
    ));
}

#[tokio::test]
async fn test_start_cascade_requires_session() {
    let kernel = common::test_kernel().await;
    let err = kernel
        .cascade
        .start_cascade(uuid::Uuid::new_v4(), "orphan prompt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::NoSession(_)));
}

#[tokio::test]
async fn test_act_requires_a_check() {
    let kernel = common::test_kernel().await;
    let mut cascade = kernel
        .cascade
        .start_cascade(kernel.session.session_id, "Hasty work", None)
        .await
        .unwrap();

    let err = kernel
        .cascade
        .record_act(&mut cascade, "skipping checks", None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::PhaseViolation(_)));
}

#[tokio::test]
async fn test_bad_confidence_rejected() {
    let kernel = common::test_kernel().await;
    let mut cascade = kernel
        .cascade
        .start_cascade(kernel.session.session_id, "Check inputs", None)
        .await
        .unwrap();

    for bad in [f64::NAN, -0.1, 1.5] {
        let err = kernel
            .cascade
            .submit_check(&mut cascade, "x", bad, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::BadInput(_)));
    }
}
