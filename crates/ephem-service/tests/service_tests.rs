// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the command-layer facade.

use std::sync::Arc;
use std::time::Duration;

use ephem_core::{Clock, EphemError, RecordStatus};
use ephem_exec::CommandSpec;
use ephem_service::{CoreService, RecoveryOutcome};
use ephem_test_utils::TestHarness;
use ephem_vault::Payload;

fn service(harness: &TestHarness) -> CoreService {
    CoreService::new(
        harness.config.clone(),
        harness.store.clone(),
        harness.clock.clone(),
    )
}

const APPLY_SCRIPT: &str = r#"
echo "Plan: 3 to add, 1 to change, 0 to destroy."
for r in a b c; do
  echo "null_resource.$r: Creating..."
  echo "null_resource.$r: Creation complete after 0s [id=$r]"
done
echo "null_resource.d: Modifying... [id=d]"
echo "null_resource.d: Modifications complete after 0s [id=d]"
echo "creds at: $GOOGLE_APPLICATION_CREDENTIALS"
"#;

#[tokio::test]
async fn recover_after_restart_restores_payload() {
    let harness = TestHarness::new().unwrap();
    let session_id = {
        let first = service(&harness);
        let session_id = first.open_session("u1", "g1").await.unwrap();
        first
            .store_secret(session_id.as_str(), "project", "p-123")
            .await
            .unwrap();
        first.seal_recovery(session_id.as_str(), "u1").await.unwrap();
        session_id
    };

    // A new process: empty vault, same record store.
    let second = service(&harness);
    let remaining = second.recover(session_id.as_str(), "u1").await.unwrap();
    assert!(remaining > Duration::ZERO);

    let payload = second.vault().get(session_id.as_str()).await.unwrap();
    assert_eq!(payload.len(), 1);
    assert_eq!(payload.get("project"), Some("p-123"));
}

#[tokio::test]
async fn recover_by_other_user_is_an_opaque_failure() {
    let harness = TestHarness::new().unwrap();
    let first = service(&harness);
    let session_id = first.open_session("u1", "g1").await.unwrap();
    first.seal_recovery(session_id.as_str(), "u1").await.unwrap();

    let second = service(&harness);
    let result = second.recover(session_id.as_str(), "u2").await;
    assert!(matches!(result, Err(EphemError::AccessDenied)));
    assert_eq!(RecoveryOutcome::from_result(&result).user_message(), "recovery failed");
}

#[tokio::test]
async fn vault_expiry_is_independent_of_recovery_record() {
    let harness = TestHarness::builder()
        .with_session_ttl(Duration::from_secs(2))
        .build()
        .unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "project", "p-123").await.unwrap();
    svc.seal_recovery(session_id.as_str(), "u1").await.unwrap();

    harness.clock.advance(Duration::from_secs(2));
    assert!(matches!(
        svc.vault().get(session_id.as_str()).await,
        Err(EphemError::Expired { .. })
    ));
    assert_eq!(svc.vault().sweep(harness.clock.now()).await, 1);
    assert!(matches!(
        svc.vault().get(session_id.as_str()).await,
        Err(EphemError::Expired { .. })
    ));
    assert!(svc.ledger().record(session_id.as_str()).await.unwrap().is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn execution_reports_progress_and_releases_credential() {
    let harness = TestHarness::new().unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secrets(
        session_id.as_str(),
        [("project", "p-123"), ("credentials_json", "{\"type\":\"service_account\"}")]
            .into_iter()
            .collect::<Payload>(),
    )
    .await
    .unwrap();

    let mut renders = Vec::new();
    let output = svc
        .begin_execution(session_id.as_str(), &CommandSpec::shell(APPLY_SCRIPT), |text| {
            renders.push(text.to_string());
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(output.exit_code, Some(0));
    assert!(renders.last().unwrap().contains("100%"));
    assert!(output.stdout.contains("creds at: "));
    let path = output
        .stdout
        .lines()
        .find_map(|l| l.strip_prefix("creds at: "))
        .unwrap()
        .to_string();
    assert!(path.contains("ephem-cred-g1-"));
    assert!(!std::path::Path::new(&path).exists());

    let stats = svc.injector_stats();
    assert_eq!((stats.materialized(), stats.released()), (1, 1));
    assert!(harness.credential_artifacts().is_empty());
    assert_eq!(svc.running_executions(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn failing_progress_sink_still_releases_once() {
    let harness = TestHarness::new().unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "credentials_json", "{}")
        .await
        .unwrap();

    let result = svc
        .begin_execution(
            session_id.as_str(),
            &CommandSpec::shell("echo 'Plan: 1 to add, 0 to change, 0 to destroy.'; sleep 30"),
            |_| Err(EphemError::Internal("display went away".into())),
        )
        .await;

    assert!(matches!(result, Err(EphemError::Internal(_))));
    let stats = svc.injector_stats();
    assert_eq!((stats.materialized(), stats.released()), (1, 1));
    assert!(harness.credential_artifacts().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_mid_stream_releases_once_and_keeps_output() {
    let harness = TestHarness::new().unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "credentials_json", "{}")
        .await
        .unwrap();

    let command = CommandSpec::shell("echo 'null_resource.a: Creating...'; sleep 30")
        .timeout(Duration::from_millis(300));
    let mut seen = 0;
    let result = svc
        .begin_execution(session_id.as_str(), &command, |_| {
            seen += 1;
            Ok(())
        })
        .await;

    match result {
        Err(EphemError::Timeout { output, .. }) => {
            assert!(output.stdout.contains("null_resource.a: Creating..."));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(seen, 1);
    let stats = svc.injector_stats();
    assert_eq!((stats.materialized(), stats.released()), (1, 1));
    assert!(harness.credential_artifacts().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn close_session_cancels_and_waits_for_cleanup() {
    let harness = TestHarness::new().unwrap();
    let svc = Arc::new(service(&harness));
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "credentials_json", "{}")
        .await
        .unwrap();

    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = {
        let svc = svc.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let mut started = Some(started_tx);
            svc.begin_execution(
                session_id.as_str(),
                &CommandSpec::shell("echo 'null_resource.a: Creating...'; sleep 30"),
                move |_| {
                    if let Some(tx) = started.take() {
                        let _ = tx.send(());
                    }
                    Ok(())
                },
            )
            .await
        })
    };

    started_rx.await.unwrap();
    assert_eq!(harness.credential_artifacts().len(), 1);

    svc.close_session(session_id.as_str()).await;
    // Cleanup has finished by the time close returns.
    assert!(harness.credential_artifacts().is_empty());
    assert_eq!(svc.injector_stats().outstanding(), 0);
    assert!(matches!(
        svc.vault().get(session_id.as_str()).await,
        Err(EphemError::UnknownSession { .. })
    ));

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(EphemError::Cancelled { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn missing_credential_runs_with_ambient_environment() {
    let harness = TestHarness::new().unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "project", "p-123").await.unwrap();

    let output = svc
        .begin_execution(
            session_id.as_str(),
            &CommandSpec::shell("echo \"cred=${GOOGLE_APPLICATION_CREDENTIALS:-none}\""),
            |_| Ok(()),
        )
        .await
        .unwrap();
    assert_eq!(output.stdout, "cred=none\n");
}

#[cfg(unix)]
#[tokio::test]
async fn write_failure_prevents_spawn() {
    let mut harness = TestHarness::new().unwrap();
    // Point the credential directory below a regular file.
    let blocker = harness.credential_dir().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    harness.config.exec.credential_dir = blocker.join("creds").to_string_lossy().to_string();
    let marker = harness.credential_dir().join("spawned");

    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.store_secret(session_id.as_str(), "credentials_json", "{}")
        .await
        .unwrap();

    let result = svc
        .begin_execution(
            session_id.as_str(),
            &CommandSpec::shell(format!("touch '{}'", marker.display())),
            |_| Ok(()),
        )
        .await;
    assert!(matches!(result, Err(EphemError::WriteFailure { .. })));
    assert!(!marker.exists());
    assert_eq!(svc.injector_stats().materialized(), 0);
}

#[tokio::test]
async fn mark_outcome_is_terminal_once() {
    let harness = TestHarness::new().unwrap();
    let svc = service(&harness);
    let session_id = svc.open_session("u1", "g1").await.unwrap();
    svc.seal_recovery(session_id.as_str(), "u1").await.unwrap();

    svc.mark_outcome(session_id.as_str(), false).await.unwrap();
    svc.mark_outcome(session_id.as_str(), true).await.unwrap();
    let record = svc.ledger().record(session_id.as_str()).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
}

#[tokio::test]
async fn sweep_tick_and_shutdown() {
    let harness = TestHarness::builder()
        .with_session_ttl(Duration::from_secs(5))
        .build()
        .unwrap();
    let svc = service(&harness);
    let expiring = svc.open_session("u1", "g1").await.unwrap();
    svc.seal_recovery(expiring.as_str(), "u1").await.unwrap();
    harness.clock.advance(Duration::from_secs(6));
    let _live = svc.open_session("u2", "g1").await.unwrap();

    let report = svc.sweep_tick(harness.clock.now()).await.unwrap();
    assert_eq!(report.sessions_removed, 1);
    assert_eq!(report.records_removed, 1);

    svc.shutdown().await;
    assert!(svc.vault().is_empty());
}

#[tokio::test]
async fn startup_removes_stale_artifacts() {
    let harness = TestHarness::new().unwrap();
    std::fs::write(harness.credential_dir().join("ephem-cred-g1-old.json"), b"{}").unwrap();
    let svc = service(&harness);
    assert_eq!(svc.startup().unwrap(), 1);
    assert!(harness.credential_artifacts().is_empty());
}
