//! End-to-end sync between devices through an in-process blob server.
//!
//! Each device is a `LocalState` over its own `MemoryStore`, syncing via
//! `HttpBlobRemote` against `scribble-server` bound to `127.0.0.1:0`.

use std::time::Duration;

use scribble::local::LocalState;
use scribble::store::{self, KeyValueStore, MemoryStore, keys};
use scribble::sync::orchestrator::{SyncOptions, SyncOrchestrator, SyncSettings};
use scribble::sync::remote::{BlobRemote, HttpBlobRemote};
use scribble::sync::{SyncEndpoint, SyncError, SyncReport};
use scribble_proto::{TaskStatus, clock};

const TOKEN: &str = "integration-token";

const FORCE: SyncOptions = SyncOptions {
    force: true,
    adopt_remote: false,
};

const FORCE_PULL: SyncOptions = SyncOptions {
    force: true,
    adopt_remote: true,
};

/// Start the blob server in-process and return its base URL.
async fn start_blob_server(token: Option<&str>) -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) =
        scribble_server::server::start_server("127.0.0.1:0", token.map(str::to_string))
            .await
            .expect("failed to start blob server");
    (format!("http://{addr}"), handle)
}

fn remote(base: &str, sync_id: &str, token: &str) -> HttpBlobRemote {
    let endpoint = SyncEndpoint::new(base, sync_id, token).unwrap();
    HttpBlobRemote::new(endpoint, Duration::from_secs(5))
}

fn orchestrator(base: &str, sync_id: &str, token: &str) -> SyncOrchestrator<HttpBlobRemote> {
    SyncOrchestrator::new(Some(remote(base, sync_id, token)), SyncSettings::default())
}

async fn device() -> LocalState<MemoryStore> {
    LocalState::load(MemoryStore::new(), clock::now_ms())
        .await
        .unwrap()
}

fn texts(local: &LocalState<MemoryStore>) -> Vec<&str> {
    local.state().tasks.iter().map(|t| t.text.as_str()).collect()
}

#[tokio::test]
async fn push_to_empty_remote_then_second_device_pulls() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "first_push", TOKEN);
    let t0 = clock::now_ms();

    let mut alice = device().await;
    alice.add_task("buy milk", "errands", t0).unwrap();
    alice.persist().await.unwrap();

    let report = sync.run(&mut alice, FORCE, t0).await;
    assert!(matches!(
        report,
        SyncReport::Synced {
            pulled: false,
            pushed: true
        }
    ));
    assert!(!alice.is_dirty());
    assert!(!store::get_flag(alice.store(), keys::DIRTY).await.unwrap());

    let mut bob = device().await;
    let report = sync.run(&mut bob, SyncOptions::default(), t0 + 10).await;
    assert!(matches!(
        report,
        SyncReport::Synced {
            pulled: true,
            pushed: false
        }
    ));
    assert_eq!(texts(&bob), ["buy milk"]);
    assert_eq!(bob.state().tasks[0].group, "errands");
    assert_eq!(bob.state().tasks, alice.state().tasks);
}

#[tokio::test]
async fn edits_from_two_devices_converge() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "converge", TOKEN);
    let t0 = clock::now_ms();

    let mut alice = device().await;
    let shared = alice.add_task("shared", "", t0).unwrap();
    assert!(sync.run(&mut alice, FORCE, t0).await.is_success());

    let mut bob = device().await;
    assert!(sync.run(&mut bob, FORCE, t0 + 5).await.is_success());

    // Disjoint edits while both are offline.
    bob.add_task("from bob", "", t0 + 10).unwrap();
    alice
        .set_status(shared, TaskStatus::Completed, t0 + 20)
        .unwrap();

    assert!(sync.run(&mut bob, FORCE, t0 + 30).await.is_success());
    assert!(sync.run(&mut alice, FORCE, t0 + 40).await.is_success());
    assert!(sync.run(&mut bob, FORCE_PULL, t0 + 50).await.is_success());

    assert_eq!(alice.state().tasks, bob.state().tasks);
    assert_eq!(alice.state().tasks.len(), 2);
    assert!(
        bob.state()
            .task(shared)
            .is_some_and(scribble_proto::Task::is_completed)
    );
}

#[tokio::test]
async fn deletion_propagates_over_http() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "deletion", TOKEN);
    let t0 = clock::now_ms();

    let mut alice = device().await;
    let doomed = alice.add_task("doomed", "", t0).unwrap();
    alice.add_task("keeper", "", t0 + 1).unwrap();
    assert!(sync.run(&mut alice, FORCE, t0).await.is_success());

    let mut bob = device().await;
    let mut carol = device().await;
    assert!(sync.run(&mut bob, FORCE, t0 + 5).await.is_success());
    assert!(sync.run(&mut carol, FORCE, t0 + 5).await.is_success());

    bob.delete_task(doomed, t0 + 10).unwrap();
    assert!(sync.run(&mut bob, FORCE, t0 + 10).await.is_success());

    // Carol still holds the old copy and pushes it with an unrelated edit.
    carol.set_user_name("carol", t0 + 15);
    assert!(sync.run(&mut carol, FORCE, t0 + 15).await.is_success());
    assert_eq!(texts(&carol), ["keeper"]);

    let blob = remote(&base, "deletion", TOKEN).fetch().await.unwrap().unwrap();
    assert!(blob.task(doomed).is_none());
    assert!(blob.tombstones.contains_key(&doomed));

    assert!(sync.run(&mut alice, FORCE_PULL, t0 + 20).await.is_success());
    assert_eq!(texts(&alice), ["keeper"]);
    assert!(alice.state().tombstones.contains_key(&doomed));
}

#[tokio::test]
async fn concurrent_pushes_lose_nothing() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "concurrent", TOKEN);
    let t0 = clock::now_ms();

    let mut a = device().await;
    let mut b = device().await;
    let mut c = device().await;
    a.add_task("a", "", t0).unwrap();
    b.add_task("b", "", t0).unwrap();
    c.add_task("c", "", t0).unwrap();

    let (ra, rb, rc) = tokio::join!(
        sync.run(&mut a, FORCE, t0),
        sync.run(&mut b, FORCE, t0),
        sync.run(&mut c, FORCE, t0),
    );
    assert!(ra.is_success() && rb.is_success() && rc.is_success());

    let blob = remote(&base, "concurrent", TOKEN).fetch().await.unwrap().unwrap();
    let mut all: Vec<&str> = blob.tasks.iter().map(|t| t.text.as_str()).collect();
    all.sort_unstable();
    assert_eq!(all, ["a", "b", "c"]);
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "auth", "not-the-token");
    let t0 = clock::now_ms();

    let mut local = device().await;
    local.add_task("secret plans", "", t0).unwrap();

    let report = sync.run(&mut local, FORCE, t0).await;
    assert!(matches!(report, SyncReport::Failed(SyncError::Unauthorized)));
    assert!(local.is_dirty());
    assert_eq!(
        store::get_millis(local.store(), keys::LAST_SYNC_ATTEMPT)
            .await
            .unwrap(),
        t0
    );
    assert_eq!(
        local.store().get(keys::LAST_SYNC_SUCCESS).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn server_without_token_refuses_sync() {
    let (base, _handle) = start_blob_server(None).await;
    let sync = orchestrator(&base, "no_token", TOKEN);

    let mut local = device().await;
    let report = sync.run(&mut local, FORCE, clock::now_ms()).await;
    assert!(matches!(report, SyncReport::Failed(SyncError::Transport(_))));
}

#[tokio::test]
async fn unforced_sync_is_gated_after_success() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let sync = orchestrator(&base, "gated", TOKEN);
    let t0 = clock::now_ms();

    let mut local = device().await;
    local.add_task("once a day", "", t0).unwrap();
    assert!(sync.run(&mut local, SyncOptions::default(), t0).await.is_success());

    local.add_task("later", "", t0 + 1_000).unwrap();
    let report = sync.run(&mut local, SyncOptions::default(), t0 + 1_000).await;
    assert!(matches!(report, SyncReport::NotDue));
    assert!(local.is_dirty());
}

#[tokio::test]
async fn fresh_sync_id_fetches_null() {
    let (base, _handle) = start_blob_server(Some(TOKEN)).await;
    let fetched = remote(&base, "never_written", TOKEN).fetch().await.unwrap();
    assert!(fetched.is_none());
}
