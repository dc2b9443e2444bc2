use proxyctl::core::ProxyctlError;
use proxyctl::installer::{InstallOptions, Installer};
use proxyctl::service::ServiceManager;
use proxyctl::test_utils::TestInstall;
use proxyctl::upgrade::{UpdateOptions, UpdateOutcome, UpdateState};
use proxyctl::version::{VersionFact, VersionTracker};
use std::sync::Arc;
use std::sync::atomic::Ordering;

async fn install(env: &TestInstall) {
    Installer::new(
        env.cfg.clone(),
        env.source.clone(),
        env.builder.clone(),
        env.service.clone(),
        env.health.clone(),
    )
    .run(InstallOptions::default())
    .await
    .unwrap();
}

fn tracker(env: &TestInstall) -> VersionTracker {
    VersionTracker::new(env.source.clone(), Arc::new(proxyctl::test_utils::FakeBinaryProbe), env.health.clone())
}

#[tokio::test]
async fn test_install_then_update_then_rollback() {
    let env = TestInstall::new("v1.0.0").unwrap();
    install(&env).await;

    env.source.publish("v1.1.0");
    let report = env.updater().run(UpdateOptions::default()).await.unwrap();
    assert!(matches!(report.outcome, UpdateOutcome::Updated { ref to, .. } if to == "v1.1.0"));

    let snapshot = tracker(&env).snapshot(&env.cfg).await;
    assert_eq!(snapshot.binary, VersionFact::Known("v1.1.0".into()));
    assert_eq!(snapshot.running, VersionFact::Known("v1.1.0".into()));
    assert_eq!(snapshot.backup, VersionFact::Known("v1.0.0".into()));

    env.updater().rollback_manager().rollback().await.unwrap();
    let snapshot = tracker(&env).snapshot(&env.cfg).await;
    assert_eq!(snapshot.binary, VersionFact::Known("v1.0.0".into()));
    assert_eq!(snapshot.running, VersionFact::Known("v1.0.0".into()));
    assert_eq!(snapshot.backup, VersionFact::Absent);
    assert!(!env.cfg.failed_path().exists());

    // A second rollback has nothing to restore.
    let err = env.updater().rollback_manager().rollback().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<ProxyctlError>(), Some(ProxyctlError::NoBackup { .. })));
}

#[tokio::test]
async fn test_repeated_updates_keep_the_backup() {
    let env = TestInstall::deployed("v1.0.0").await.unwrap();
    env.source.publish("v1.1.0");
    env.updater().run(UpdateOptions::default()).await.unwrap();
    let backup = std::fs::read_to_string(env.cfg.backup_path()).unwrap();

    for _ in 0..3 {
        let report = env.updater().run(UpdateOptions::default()).await.unwrap();
        assert!(matches!(report.outcome, UpdateOutcome::UpToDate { .. }));
    }
    assert_eq!(env.builder.builds.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(env.cfg.backup_path()).unwrap(), backup);
}

#[tokio::test]
async fn test_broken_release_is_reverted_and_next_release_applies() {
    let env = TestInstall::deployed("v1.0.0").await.unwrap();
    env.source.publish("v1.1.0");
    env.builder.mark_unhealthy("v1.1.0");

    let mut states = Vec::new();
    let err = env.updater().run_recorded(UpdateOptions::default(), &mut states).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProxyctlError>(),
        Some(ProxyctlError::UpdateReverted { restored, .. }) if restored == "v1.0.0"
    ));
    assert_eq!(states.last(), Some(&UpdateState::RolledBack));
    assert_eq!(env.active_version().as_deref(), Some("v1.0.0"));
    assert!(env.service.is_running().await.unwrap());

    env.source.publish("v1.2.0");
    let report = env.updater().run(UpdateOptions::default()).await.unwrap();
    assert!(matches!(report.outcome, UpdateOutcome::Updated { .. }));
    assert_eq!(report.states.last(), Some(&UpdateState::Verified));
    assert_eq!(env.active_version().as_deref(), Some("v1.2.0"));
}

#[tokio::test]
async fn test_dry_run_reports_pending_release() {
    let env = TestInstall::deployed("v1.0.0").await.unwrap();
    env.source.publish("v2.0.0");

    let report = env
        .updater()
        .run(UpdateOptions {
            dry_run: true,
            ..UpdateOptions::default()
        })
        .await
        .unwrap();
    match report.outcome {
        UpdateOutcome::DryRun {
            snapshot,
            remote,
        } => {
            assert_eq!(snapshot.binary, VersionFact::Known("v1.0.0".into()));
            assert_eq!(remote.map(|r| r.version).as_deref(), Some("v2.0.0"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(env.builder.builds.load(Ordering::SeqCst), 0);
    assert_eq!(env.active_version().as_deref(), Some("v1.0.0"));
}
