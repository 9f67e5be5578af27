//! End-to-end tests for the sync client: connect flows, upload passes, and
//! error handling through a scripted connector.

use std::time::Duration;

use driftsync_engine::{ConnectorError, SyncClient};
use driftsync_testkit::{ScriptedConnector, TestDatabase, UploadScript};

/// Polls `condition` until it holds or two seconds elapse.
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls until the CRUD queue is empty or two seconds elapse.
async fn wait_for_drained(db: &driftsync_core::Database) -> bool {
    let queue = db.crud_transactions();
    for _ in 0..200 {
        if !queue.has_pending().await.unwrap_or(true) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_reports_connected_status() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| db.status().connected).await);
    assert_eq!(connector.fetch_count(), 1);

    client.disconnect().unwrap();
    assert!(wait_for(|| !db.status().connected).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_connection_attempt_fetches_a_fresh_token() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| db.status().connected).await);
    client.disconnect().unwrap();
    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| connector.fetch_count() == 2).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn token_failure_sets_download_error() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());
    connector.script_token(Err(ConnectorError::new(401, "expired")));

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| db.status().download_error.is_some()).await);
    assert!(!db.status().connected);

    // The next attempt succeeds and clears the error.
    client.connect(connector).unwrap();
    assert!(wait_for(|| db.status().connected).await);
    assert_eq!(db.status().download_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn local_writes_are_uploaded_while_connected() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| db.status().connected).await);

    db.insert_todo("t1", "sync me").await;

    assert!(wait_for_drained(&db).await);
    assert!(connector.upload_count() >= 1);
    let status = db.status();
    assert!(!status.uploading);
    assert_eq!(status.upload_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_failure_surfaces_and_host_retry_recovers() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());
    connector.script_upload(UploadScript::Fail(ConnectorError::new(503, "backend down")));

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector.clone()).unwrap();
    assert!(wait_for(|| db.status().connected).await);

    db.insert_todo("t1", "will fail first").await;
    assert!(wait_for(|| db.status().upload_error.is_some()).await);

    // Host-driven retry; the unscripted fallback completes the transaction.
    client.trigger_upload().unwrap();
    assert!(wait_for(|| db.status().upload_error.is_none()).await);
    assert!(connector.upload_count() >= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn connector_skipping_completion_is_detected() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());
    connector.script_upload(UploadScript::SkipCompletion);
    connector.script_upload(UploadScript::SkipCompletion);

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    client.connect(connector).unwrap();
    assert!(wait_for(|| db.status().connected).await);

    db.insert_todo("t1", "never completed").await;
    assert!(wait_for(|| db
        .status()
        .upload_error
        .as_deref()
        .is_some_and(|err| err.contains("without completing")))
    .await);
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_is_recorded_when_queue_drains() {
    let db = TestDatabase::memory().await;
    let connector = ScriptedConnector::new(db.db.clone());
    connector.script_upload(UploadScript::CompleteNextWithCheckpoint(99));

    let (client, tasks) = SyncClient::attach(db.db.clone());
    tasks.spawn_with_tokio();

    db.insert_todo("t1", "checkpointed").await;
    client.connect(connector).unwrap();

    assert!(wait_for_drained(&db).await);

    let reader = db.read_lease().await.unwrap();
    let target: i64 = reader
        .query_row(
            "SELECT target_op FROM ps_sync_state WHERE name = '$local'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(target, 99);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_client_stops_commands() {
    let db = TestDatabase::memory().await;

    let (client, tasks) = SyncClient::attach(db.db.clone());
    let mut handles = Vec::new();
    tasks.spawn_with(|task| handles.push(tokio::spawn(task)));

    drop(client);
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop after the client is dropped")
            .unwrap();
    }
}
