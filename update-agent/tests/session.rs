mod common;

use common::{main_feed, sha256_hex, update_feed, verifier, MockMirror, CHANNEL};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use update_agent::config::{Config, SessionMode};
use update_agent::{LogSink, UpdateError, UpdateSession};

const CORE: &[u8] = b"core library bytes";
const DATA: &[u8] = b"client data";

fn config(root: &Path, mirrors: &[&MockMirror]) -> Config {
    let mirrors = mirrors
        .iter()
        .map(|m| format!("\"{}\"", m.origin()))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
[feed]
mirrors = [{mirrors}]
channel = "{CHANNEL}"
connect_timeout_secs = 5
request_timeout_secs = 5

[install]
root = "{}"

[download]
concurrency = 2
"#,
        root.display()
    );
    Config::from_toml_str(&toml).unwrap()
}

fn publish(mirror: &MockMirror, min_revision: Option<i64>) {
    let core_sha = sha256_hex(CORE);
    let data_sha = sha256_hex(DATA);
    let update = update_feed(&[
        ("lib/core.jar", core_sha.as_str(), Some(CORE.len() as i64)),
        ("client/data.bin", data_sha.as_str(), None),
    ]);
    mirror.publish_feeds(&main_feed(min_revision), &update);
    mirror.publish_file("lib/core.jar", CORE);
    mirror.publish_file("client/data.bin", DATA);
}

fn session(config: Config) -> UpdateSession {
    UpdateSession::with_verifier(config, Arc::new(LogSink), verifier())
}

#[tokio::test]
async fn test_fresh_install_then_noop() {
    let root = TempDir::new().unwrap();
    let mirror = MockMirror::start().await;
    publish(&mirror, Some(10));

    let outcome = session(config(root.path(), &[&mirror]))
        .with_client_revision(12)
        .spawn()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.report.files_completed, 2);
    assert!(!outcome.client_outdated);
    assert_eq!(fs::read(root.path().join("lib/core.jar")).unwrap(), CORE);
    assert_eq!(fs::read(root.path().join("client/data.bin")).unwrap(), DATA);

    // Everything matches now; the second run downloads nothing
    let requests_before = mirror.request_count();
    let outcome = session(config(root.path(), &[&mirror])).run().await.unwrap();
    assert_eq!(outcome.report.files_completed, 0);
    assert_eq!(mirror.request_count(), requests_before + 4);
}

#[tokio::test]
async fn test_outdated_client_is_flagged() {
    let root = TempDir::new().unwrap();
    let mirror = MockMirror::start().await;
    publish(&mirror, Some(10));

    let outcome = session(config(root.path(), &[&mirror]))
        .with_client_revision(9)
        .run()
        .await
        .unwrap();
    assert!(outcome.client_outdated);
}

#[tokio::test]
async fn test_repair_ignores_no_verify() {
    let root = TempDir::new().unwrap();
    let mirror = MockMirror::start().await;
    publish(&mirror, None);

    let mut cfg = config(root.path(), &[&mirror]);
    cfg.install.no_verify = true;
    let outcome = session(cfg.clone()).run().await.unwrap();
    assert_eq!(outcome.report.files_completed, 0);
    assert!(!root.path().join("lib/core.jar").exists());

    cfg.install.mode = SessionMode::Repair;
    let outcome = session(cfg).run().await.unwrap();
    assert_eq!(outcome.report.files_completed, 2);
}

#[tokio::test]
async fn test_unavailable_feed_fails_session() {
    let root = TempDir::new().unwrap();
    let empty = MockMirror::start().await;

    let err = session(config(root.path(), &[&empty])).run().await.unwrap_err();
    assert!(matches!(err, UpdateError::FeedExhausted { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_verified_feed_is_relayed() {
    use update_agent::relay::RelayClient;

    let root = TempDir::new().unwrap();
    let sockets = TempDir::new().unwrap();
    let mirror = MockMirror::start().await;
    publish(&mirror, Some(1));

    let mut cfg = config(root.path(), &[&mirror]);
    cfg.relay.socket_dir = Some(sockets.path().to_path_buf());

    let outcome = session(cfg.clone()).run().await.unwrap();
    let relay = outcome.start_relay(&cfg).unwrap();

    let mut client = RelayClient::connect(relay.channel_id()).await.unwrap();
    let documents = client.fetch_documents().await.unwrap();
    client.close().await.unwrap();
    relay.wait().await;

    assert_eq!(documents.main_feed, outcome.feed.documents.main_feed);
    assert_eq!(documents.update_signature, outcome.feed.documents.update_signature);
    assert!(verifier().verify(&documents.update_feed, &documents.update_signature));
    assert_eq!(fs::read_dir(sockets.path()).unwrap().count(), 0);
}
