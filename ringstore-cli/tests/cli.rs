//! Drives the `ringstore` binary against throwaway data directories

use ringstore_core::core_keyring::{KeyringRecord, RingType};
use ringstore_core::core_store::{KeyringStore, RingFilter, SqliteKeyringStore};
use ringstore_core::test_utils::{fast_encryptor, foreign_public, SecretKeyringBuilder};
use ringstore_core::Config;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn ringstore(data_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ringstore"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .env("RUST_LOG", "warn")
        .env("RINGSTORE_CRYPTO_KDF_MEMORY_KIB", "8")
        .env("RINGSTORE_CRYPTO_KDF_ITERATIONS", "1")
        .env("RINGSTORE_CRYPTO_KDF_PARALLELISM", "1")
        .env_remove("RINGSTORE_MASTER_PASSPHRASE")
        .env_remove("RINGSTORE_NEW_PASSPHRASE")
        .stdin(Stdio::null());
    cmd
}

fn run(cmd: &mut Command) -> Output {
    let output = cmd.output().expect("binary should start");
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn open_store(data_dir: &Path) -> SqliteKeyringStore {
    SqliteKeyringStore::open(Config::with_data_dir(data_dir).database_path(), 2).unwrap()
}

/// One secret keyring whose two subkeys share "p1", plus two foreign keyrings
fn seed(data_dir: &Path) -> Vec<KeyringRecord> {
    let own = SecretKeyringBuilder::new(0xA1)
        .subkey(1, "p1")
        .subkey(2, "p1")
        .build(&fast_encryptor());
    let mut records = own.records().to_vec();
    records.extend([0xF1, 0xF2].map(foreign_public));
    open_store(data_dir).bulk_insert(&records).unwrap();
    records
}

fn status_json(data_dir: &Path) -> serde_json::Value {
    let output = run(ringstore(data_dir).args(["status", "--json"]));
    serde_json::from_slice(&output.stdout).expect("status should print JSON")
}

#[test]
fn test_status_of_fresh_store() {
    let temp_dir = TempDir::new().unwrap();

    let status = status_json(temp_dir.path());

    assert_eq!(status["public_rows"], 0);
    assert_eq!(status["secret_rows"], 0);
    assert_eq!(status["flags"]["cached_consolidate"], false);
    assert!(temp_dir.path().join("keyrings.db").exists());
}

#[test]
fn test_consolidate_keeps_rows() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path());

    let output = run(ringstore(temp_dir.path()).arg("consolidate"));

    assert!(String::from_utf8_lossy(&output.stdout).contains("status: ok"));
    let status = status_json(temp_dir.path());
    assert_eq!(status["public_rows"], 3);
    assert_eq!(status["secret_rows"], 1);
}

#[test]
fn test_export_then_import_elsewhere() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    let records = seed(source.path());
    let file = source.path().join("export.pcl");

    run(ringstore(source.path()).arg("export").arg(&file).arg("--secret"));
    run(ringstore(target.path()).arg("import").arg(&file));

    let store = open_store(target.path());
    assert_eq!(store.count(RingType::Public, RingFilter::All).unwrap(), 3);
    let secret = store.get(0xA1, RingType::Secret).unwrap().expect("secret row");
    assert_eq!(secret, records[1]);
}

#[test]
fn test_migrate_with_piped_passphrase() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path());

    let mut child = ringstore(temp_dir.path())
        .arg("migrate")
        .env("RINGSTORE_MASTER_PASSPHRASE", "master")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    // only the first subkey is asked for, the second takes the same passphrase
    child.stdin.take().unwrap().write_all(b"p1\n").unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let status = status_json(temp_dir.path());
    assert_eq!(status["flags"]["has_master_passphrase"], true);
    assert_eq!(status["flags"]["partially_migrated"], false);
    assert_eq!(status["pending_migration_cache"], false);
}

#[test]
fn test_migrate_consolidates_before_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path());

    let mut child = ringstore(temp_dir.path())
        .args(["migrate", "--json"])
        .env("RINGSTORE_MASTER_PASSPHRASE", "master")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"p1\n").unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let first_entries: Vec<String> = serde_json::Deserializer::from_slice(&output.stdout)
        .into_iter::<serde_json::Value>()
        .map(|result| {
            let result = result.unwrap();
            assert_eq!(result["status"], "ok");
            result["log"]["entries"][0]["log_type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(first_entries, ["ConStart", "CcStart", "MiStart"]);
}

#[test]
fn test_migrate_resume_skips_consolidation() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path());

    // a first run that snapshots but gets no passphrase stops partially migrated
    let output = ringstore(temp_dir.path())
        .arg("migrate")
        .env("RINGSTORE_MASTER_PASSPHRASE", "master")
        .output()
        .unwrap();
    assert!(!output.status.success());

    let mut child = ringstore(temp_dir.path())
        .args(["migrate", "--json"])
        .env("RINGSTORE_MASTER_PASSPHRASE", "master")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"p1\n").unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let first_entries: Vec<String> = serde_json::Deserializer::from_slice(&output.stdout)
        .into_iter::<serde_json::Value>()
        .map(|result| result.unwrap()["log"]["entries"][0]["log_type"].as_str().unwrap().to_string())
        .collect();
    assert!(!first_entries.iter().any(|t| t == "ConStart"));
    assert_eq!(first_entries.last().map(String::as_str), Some("MiStart"));
}

#[test]
fn test_migrate_without_input_fails() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path());

    let output = ringstore(temp_dir.path())
        .arg("migrate")
        .env("RINGSTORE_MASTER_PASSPHRASE", "master")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let status = status_json(temp_dir.path());
    assert_eq!(status["flags"]["has_master_passphrase"], false);
}
