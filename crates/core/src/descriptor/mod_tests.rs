// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::tempdir;

use super::*;
use crate::store::protect::ReversibleProtector;

fn store() -> (tempfile::TempDir, Arc<ObjectStore>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(dir.path(), Arc::new(ReversibleProtector)));
    (dir, store)
}

#[derive(Default)]
struct RecordingEvents {
    ready_count: AtomicUsize,
    updated_count: AtomicUsize,
}

impl DescriptorEvents for RecordingEvents {
    fn on_ready_for_pairing(&self) {
        self.ready_count.fetch_add(1, Ordering::SeqCst);
    }
    fn on_descriptor_updated(&self, _kind: DescriptorKind) {
        self.updated_count.fetch_add(1, Ordering::SeqCst);
    }
}

fn always_valid() -> ListValidator {
    Arc::new(|_bytes: &[u8]| true)
}

fn always_invalid() -> ListValidator {
    Arc::new(|_bytes: &[u8]| false)
}

#[test]
fn aggressive_backoff_is_linear_capped_at_120() {
    assert_eq!(BackoffPolicy::Aggressive.delay_for_attempt(0), Duration::from_secs(15));
    assert_eq!(BackoffPolicy::Aggressive.delay_for_attempt(1), Duration::from_secs(30));
    assert_eq!(BackoffPolicy::Aggressive.delay_for_attempt(20), Duration::from_secs(120));
}

#[test]
fn exponential_backoff_doubles_capped_at_one_day() {
    assert_eq!(BackoffPolicy::Exponential.delay_for_attempt(0), Duration::from_secs(2));
    assert_eq!(BackoffPolicy::Exponential.delay_for_attempt(1), Duration::from_secs(4));
    assert_eq!(BackoffPolicy::Exponential.delay_for_attempt(30), Duration::from_secs(86_400));
}

#[test]
fn ssl_verify_mode_toggles_cert_and_hostname_checks_independently() {
    // (mode, accept_invalid_certs, accept_invalid_hostnames)
    let cases = [
        (SslVerifyMode::None, true, true),
        (SslVerifyMode::HostOnly, true, false),
        (SslVerifyMode::PeerOnly, false, true),
        (SslVerifyMode::Both, false, false),
    ];
    for (mode, certs, hostnames) in cases {
        assert_eq!(mode.accept_invalid_certs(), certs, "{mode:?} certs");
        assert_eq!(mode.accept_invalid_hostnames(), hostnames, "{mode:?} hostnames");
    }
}

#[test]
fn md5_hex_matches_known_vector() {
    assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
}

#[tokio::test]
async fn allowlist_update_downloads_validates_and_persists() {
    let (namespace, store) = store();
    let source_dir = tempdir().unwrap();
    let source_file = source_dir.path().join("devices.json");
    tokio::fs::write(&source_file, b"{\"devices\":[]}").await.unwrap();
    let url = format!("file://{}", source_file.display());

    let events = Arc::new(RecordingEvents::default());
    let handler = DescriptorHandler::new(
        namespace.path(),
        store.clone(),
        events.clone(),
        always_valid(),
        SslVerifyMode::Both,
    );

    handler.clone().update_allowlist(Some(url.clone()), false).await;
    // Give the spawned task a moment to complete its single iteration.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handler.is_allow_valid());
    assert_eq!(
        store.get_system_property(system_property::CURRENT_DEVICE_DESCRIPTOR_URL).await,
        Some(url)
    );
    assert_eq!(events.updated_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ready_for_pairing_fires_once_both_lists_validate() {
    let (namespace, store) = store();
    let allow_dir = tempdir().unwrap();
    let deny_dir = tempdir().unwrap();
    let allow_file = allow_dir.path().join("allow.json");
    let deny_file = deny_dir.path().join("deny.json");
    tokio::fs::write(&allow_file, b"{}").await.unwrap();
    tokio::fs::write(&deny_file, b"{}").await.unwrap();

    let events = Arc::new(RecordingEvents::default());
    let handler = DescriptorHandler::new(
        namespace.path(),
        store.clone(),
        events.clone(),
        always_valid(),
        SslVerifyMode::Both,
    );

    handler.clone().update_allowlist(Some(format!("file://{}", allow_file.display())), false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.ready_count.load(Ordering::SeqCst), 0, "denylist not yet valid");

    handler.clone().update_denylist(Some(format!("file://{}", deny_file.display()))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.ready_count.load(Ordering::SeqCst), 1);
    assert!(handler.is_ready_for_pairing());
}

#[tokio::test]
async fn invalid_list_never_marks_valid_and_keeps_retrying() {
    let (namespace, store) = store();
    let source_dir = tempdir().unwrap();
    let source_file = source_dir.path().join("bad.json");
    tokio::fs::write(&source_file, b"garbage").await.unwrap();
    let url = format!("file://{}", source_file.display());

    let events = Arc::new(RecordingEvents::default());
    let handler = DescriptorHandler::new(
        namespace.path(),
        store.clone(),
        events.clone(),
        always_invalid(),
        SslVerifyMode::Both,
    );

    handler.clone().update_allowlist(Some(url), false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handler.is_allow_valid());
    handler.shutdown();
}

#[tokio::test]
async fn update_denylist_with_none_clears_local_state() {
    let (namespace, store) = store();
    store
        .set_system_property(system_property::CURRENT_DENYLIST_URL, "file:///old")
        .await
        .unwrap();
    store
        .set_system_property(system_property::CURRENT_DENYLIST_MD5, "deadbeef")
        .await
        .unwrap();

    let events = Arc::new(RecordingEvents::default());
    let handler = DescriptorHandler::new(
        namespace.path(),
        store.clone(),
        events,
        always_valid(),
        SslVerifyMode::Both,
    );

    handler.clone().update_denylist(None).await;

    assert_eq!(store.get_system_property(system_property::CURRENT_DENYLIST_URL).await, None);
    assert_eq!(store.get_system_property(system_property::CURRENT_DENYLIST_MD5).await, None);
}

#[tokio::test(start_paused = true)]
async fn reprocess_is_debounced_to_a_single_call() {
    let (namespace, store) = store();
    let events = Arc::new(RecordingEvents::default());
    let handler = DescriptorHandler::new(
        namespace.path(),
        store,
        events,
        always_valid(),
        SslVerifyMode::Both,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let calls = calls.clone();
        handler.clone().trigger_reprocess(Arc::new(move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }));
        tokio::time::advance(Duration::from_secs(5)).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0, "each trigger should reset the window");

    tokio::time::advance(Duration::from_secs(31)).await;
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "five triggers should collapse into one call");
}
