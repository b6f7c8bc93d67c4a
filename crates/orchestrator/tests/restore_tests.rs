//! Integration tests for restore, including restore-time integrity checks.

mod common;

use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use bbr_core::error::CoreError;
use bbr_core::script::ScriptKind;
use bbr_orchestrator::{BackupOptions, Checkpoint, OrchestratorError, RestoreOptions};

use common::{Fixture, Script, DEPLOYMENT, SCRATCH};

async fn backup_into(fixture: &Fixture, parent: &Path) -> PathBuf {
    let options = BackupOptions {
        artifact_parent: parent.to_owned(),
        with_manifest: false,
    };
    let outcome = fixture
        .orchestrator()
        .backup(DEPLOYMENT, &options, &Checkpoint::never())
        .await
        .unwrap();
    assert!(outcome.report.is_success(), "{}", outcome.report.error_message());
    outcome.artifact_path.unwrap()
}

fn restore_options(path: &Path) -> RestoreOptions {
    RestoreOptions {
        artifact_path: path.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Test: round trip
// ---------------------------------------------------------------------------

/// Backing up and restoring reproduces the original files byte for byte.
#[tokio::test]
async fn backup_then_restore_round_trips_files() {
    let fixture = Fixture::new(&[("redis", 0), ("redis", 1)]);
    for (i, host) in fixture.hosts.iter().enumerate() {
        let dump = format!("dump-{i}");
        host.script(
            "redis-server",
            ScriptKind::Backup,
            Script::writes(&[("dump.rdb", dump.as_bytes()), ("nested/aof", b"append")]),
        )
        .script(
            "redis-server",
            ScriptKind::Restore,
            Script::copies_to("/var/vcap/store/redis"),
        )
        .script("redis-server", ScriptKind::PreRestoreLock, Script::ok())
        .script("redis-server", ScriptKind::PostRestoreUnlock, Script::ok());
    }

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;

    let report = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0, "{}", report.error_message());
    for (i, host) in fixture.hosts.iter().enumerate() {
        assert_eq!(
            host.file("/var/vcap/store/redis/dump.rdb").unwrap(),
            format!("dump-{i}").into_bytes()
        );
        assert_eq!(
            host.file("/var/vcap/store/redis/nested/aof").unwrap(),
            b"append".to_vec()
        );
        assert!(!host.exists(SCRATCH));
    }
    assert_eq!(fixture.runs_of(ScriptKind::PreRestoreLock).len(), 2);
    assert_eq!(fixture.runs_of(ScriptKind::PostRestoreUnlock).len(), 2);
}

/// A job declaring `restore_name` receives the custom artifact produced
/// elsewhere in the deployment.
#[tokio::test]
async fn restore_name_resolves_to_custom_artifact() {
    let fixture = Fixture::new(&[("producer", 0), ("consumer", 0)]);
    fixture
        .host(0)
        .script("db", ScriptKind::Metadata, Script::print("backup_name: shared\n"))
        .script("db", ScriptKind::Backup, Script::writes(&[("db.sql", b"rows")]));
    fixture
        .host(1)
        .script("app", ScriptKind::Metadata, Script::print("restore_name: shared\n"))
        .script("app", ScriptKind::Restore, Script::copies_to("/var/vcap/store/app"));

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;
    assert!(dir.join("shared.tar").exists());

    let report = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap();

    assert!(report.is_success(), "{}", report.error_message());
    assert_eq!(
        fixture.host(1).file("/var/vcap/store/app/db.sql").unwrap(),
        b"rows".to_vec()
    );
    assert!(fixture
        .calls()
        .contains(&format!("consumer/0 upload {SCRATCH}/shared")));
}

// ---------------------------------------------------------------------------
// Test: integrity
// ---------------------------------------------------------------------------

/// Changing one recorded checksum fails the restore before any instance is
/// contacted.
#[tokio::test]
async fn tampered_metadata_is_reported_as_corrupted() {
    let fixture = Fixture::new(&[("redis", 0)]);
    fixture
        .host(0)
        .script("redis-server", ScriptKind::Backup, Script::writes(&[("dump.rdb", b"data")]))
        .script("redis-server", ScriptKind::Restore, Script::copies_to("/restored"));

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;

    let metadata_path = dir.join("metadata");
    let original = std::fs::read_to_string(&metadata_path).unwrap();
    let digest = bbr_core::hashing::sha256_hex(b"data");
    let flipped = if digest.starts_with('0') { "1" } else { "0" };
    let tampered = original.replacen(&digest, &format!("{flipped}{}", &digest[1..]), 1);
    assert_ne!(original, tampered);
    std::fs::write(&metadata_path, tampered).unwrap();

    let calls_before = fixture.calls().len();
    let err = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap_err();

    assert_matches!(err, OrchestratorError::Core(CoreError::CorruptedBackup(_)));
    assert!(err.to_string().starts_with("Backup is corrupted"));
    assert_eq!(fixture.calls().len(), calls_before, "no instance was contacted");
    assert!(fixture.host(0).file("/restored/dump.rdb").is_none());
}

#[tokio::test]
async fn restore_requires_an_artifact_for_every_restoring_job() {
    let fixture = Fixture::new(&[("redis", 0)]);
    fixture
        .host(0)
        .script("redis-server", ScriptKind::Backup, Script::writes(&[("f", b"x")]));

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;

    fixture
        .host(0)
        .script("sentinel", ScriptKind::Restore, Script::ok());

    let calls_before = fixture.calls().len();
    let err = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap_err();

    assert_matches!(err, OrchestratorError::Core(CoreError::DeploymentMismatch { .. }));
    let new_calls = &fixture.calls()[calls_before..];
    assert!(
        new_calls.iter().all(|c| !c.contains(" run ") && !c.contains(" upload ")),
        "{new_calls:?}"
    );
}

#[tokio::test]
async fn missing_artifact_directory_is_an_error() {
    let fixture = Fixture::new(&[("redis", 0)]);
    let err = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(Path::new("/nonexistent/bbr-backup")))
        .await
        .unwrap_err();
    assert_matches!(err, OrchestratorError::ArtifactDirectory { .. });
}

// ---------------------------------------------------------------------------
// Test: failures during restore
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restore_script_failure_exits_one_and_still_unlocks() {
    let fixture = Fixture::new(&[("redis", 0), ("redis", 1)]);
    for host in &fixture.hosts {
        host.script("redis-server", ScriptKind::Backup, Script::writes(&[("f", b"x")]))
            .script("redis-server", ScriptKind::PostRestoreUnlock, Script::ok());
    }
    fixture
        .host(0)
        .script("redis-server", ScriptKind::Restore, Script::fail(1));
    fixture
        .host(1)
        .script("redis-server", ScriptKind::Restore, Script::copies_to("/restored"));

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;

    let report = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 1);
    assert!(report
        .error_message()
        .contains("operate failed for job redis-server on redis/0"));
    assert_eq!(fixture.host(1).file("/restored/f").unwrap(), b"x".to_vec());
    assert_eq!(fixture.runs_of(ScriptKind::PostRestoreUnlock).len(), 2);
}

#[tokio::test]
async fn restore_lock_failure_skips_restore_and_exits_four() {
    let fixture = Fixture::new(&[("redis", 0)]);
    fixture
        .host(0)
        .script("redis-server", ScriptKind::Backup, Script::writes(&[("f", b"x")]))
        .script("redis-server", ScriptKind::Restore, Script::ok());

    let parent = tempfile::tempdir().unwrap();
    let dir = backup_into(&fixture, parent.path()).await;

    fixture
        .host(0)
        .script("redis-server", ScriptKind::PreRestoreLock, Script::fail(1))
        .script("redis-server", ScriptKind::PostRestoreUnlock, Script::ok());

    let report = fixture
        .orchestrator()
        .restore(DEPLOYMENT, &restore_options(&dir))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 4);
    assert!(fixture.runs_of(ScriptKind::Restore).is_empty());
    assert_eq!(fixture.runs_of(ScriptKind::PostRestoreUnlock).len(), 1);
}
