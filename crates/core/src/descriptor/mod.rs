// SPDX-License-Identifier: Apache-2.0

//! Allow-list and deny-list handling: background download/validate tasks for
//! the two gating documents that decide which devices are even eligible for
//! pairing, plus the debounced device-descriptor reprocessing sweep that
//! re-evaluates every persisted device whenever either list changes.

pub mod catalog;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DescriptorError;
use crate::model::system_property;
use crate::store::ObjectStore;

/// Validates raw list bytes before they're accepted. Kept as an injected
/// function rather than a fixed format: allow-list and deny-list schemas are
/// owned by whatever subsystem actually parses them, not by the fetch loop.
pub type ListValidator = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

type ReprocessFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once the debounce window elapses; expected to walk every
/// persisted device and re-run pairing eligibility against the freshly
/// updated lists. Lives outside this module because that walk needs the
/// object store and driver registry both, which `descriptor` doesn't hold.
pub type ReprocessCallback = Arc<dyn Fn() -> ReprocessFuture + Send + Sync>;

/// TLS verification strictness for list downloads (spec.md:241's four
/// postures). Chain and hostname checks are independent toggles —
/// `danger_accept_invalid_certs`/`danger_accept_invalid_hostnames` — both
/// exposed by the `rustls-tls` backend this workspace links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslVerifyMode {
    /// Neither the certificate chain nor the hostname is checked.
    None,
    /// Hostname must match; an untrusted/expired chain is still accepted.
    HostOnly,
    /// Chain must be trusted; a hostname mismatch is still accepted.
    PeerOnly,
    /// Full verification — the default.
    Both,
}

impl SslVerifyMode {
    fn accept_invalid_certs(self) -> bool {
        matches!(self, Self::None | Self::HostOnly)
    }

    fn accept_invalid_hostnames(self) -> bool {
        matches!(self, Self::None | Self::PeerOnly)
    }
}

/// Retry cadence for a failed download. The allow-list uses `Aggressive`
/// while the gateway hasn't yet been activated (pairing is blocked until a
/// valid list lands) and `Exponential` afterward; the deny-list always uses
/// `Aggressive`, since a stale denylist is a standing security gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Linear 15s, 30s, ..., capped at 120s.
    Aggressive,
    /// Doubling from 2s, capped at 86400s (one day).
    Exponential,
}

impl BackoffPolicy {
    fn delay_for_attempt(self, attempt: u32) -> Duration {
        match self {
            Self::Aggressive => {
                Duration::from_secs(15u64.saturating_mul(u64::from(attempt) + 1).min(120))
            }
            Self::Exponential => {
                let secs = 2u64.checked_pow(attempt + 1).unwrap_or(u64::MAX);
                Duration::from_secs(secs.min(86_400))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Allow,
    Deny,
}

impl DescriptorKind {
    fn url_property_key(self) -> &'static str {
        match self {
            Self::Allow => system_property::CURRENT_DEVICE_DESCRIPTOR_URL,
            Self::Deny => system_property::CURRENT_DENYLIST_URL,
        }
    }

    fn md5_property_key(self) -> &'static str {
        match self {
            Self::Allow => system_property::CURRENT_DEVICE_DESCRIPTOR_MD5,
            Self::Deny => system_property::CURRENT_DENYLIST_MD5,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Allow => "allowlist",
            Self::Deny => "denylist",
        }
    }
}

/// Notified on list-level state transitions. Wiring these into real pairing
/// logic and the event sink both belong to `lifecycle`.
pub trait DescriptorEvents: Send + Sync {
    /// Fires exactly once per process lifetime, the first moment both lists
    /// have validated at least once.
    fn on_ready_for_pairing(&self) {}
    /// Fires every time a list's on-disk content actually changes (not on a
    /// no-op "already up to date" iteration).
    fn on_descriptor_updated(&self, kind: DescriptorKind) {}
}

fn local_path(dir: &std::path::Path, kind: DescriptorKind) -> PathBuf {
    match kind {
        DescriptorKind::Allow => dir.join("device_descriptor.json"),
        DescriptorKind::Deny => dir.join("denylist.json"),
    }
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

async fn fetch_bytes(url: &str, ssl_mode: SslVerifyMode) -> Result<Vec<u8>, DescriptorError> {
    if let Some(path) = url.strip_prefix("file://") {
        let bytes = tokio::fs::read(path).await.map_err(|_| DescriptorError::Download)?;
        return if bytes.is_empty() { Err(DescriptorError::Download) } else { Ok(bytes) };
    }

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(ssl_mode.accept_invalid_certs())
        .danger_accept_invalid_hostnames(ssl_mode.accept_invalid_hostnames())
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|_| DescriptorError::Download)?;
    let response = client.get(url).send().await.map_err(|_| DescriptorError::Download)?;
    if response.status().as_u16() != 200 {
        return Err(DescriptorError::Download);
    }
    let bytes = response.bytes().await.map_err(|_| DescriptorError::Download)?;
    if bytes.is_empty() {
        return Err(DescriptorError::Download);
    }
    Ok(bytes.to_vec())
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningTask {
    async fn cancel(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

/// Owns the download/validate/activate lifecycle for both lists plus the
/// debounced reprocessing sweep. One instance per process.
pub struct DescriptorHandler {
    dir: PathBuf,
    store: Arc<ObjectStore>,
    events: Arc<dyn DescriptorEvents>,
    validator: ListValidator,
    ssl_mode: SslVerifyMode,
    reprocess_debounce: Duration,
    allow_valid: AtomicBool,
    deny_valid: AtomicBool,
    ready_fired: AtomicBool,
    allow_task: Mutex<Option<RunningTask>>,
    deny_task: Mutex<Option<RunningTask>>,
    reprocess_task: Mutex<Option<RunningTask>>,
}

impl DescriptorHandler {
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<ObjectStore>,
        events: Arc<dyn DescriptorEvents>,
        validator: ListValidator,
        ssl_mode: SslVerifyMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            store,
            events,
            validator,
            ssl_mode,
            reprocess_debounce: Duration::from_secs(30),
            allow_valid: AtomicBool::new(false),
            deny_valid: AtomicBool::new(false),
            ready_fired: AtomicBool::new(false),
            allow_task: Mutex::new(None),
            deny_task: Mutex::new(None),
            reprocess_task: Mutex::new(None),
        })
    }

    pub fn is_allow_valid(&self) -> bool {
        self.allow_valid.load(Ordering::Acquire)
    }

    pub fn is_deny_valid(&self) -> bool {
        self.deny_valid.load(Ordering::Acquire)
    }

    pub fn is_ready_for_pairing(&self) -> bool {
        self.ready_fired.load(Ordering::Acquire)
    }

    /// `updateAllowlist(url)`. Cancels any in-flight allow-list task and, if
    /// `url` is present, starts a fresh one. `activated` selects the backoff
    /// policy: aggressive before the gateway's first successful activation,
    /// exponential afterward.
    pub async fn update_allowlist(self: Arc<Self>, url: Option<String>, activated: bool) {
        self.restart_task(DescriptorKind::Allow, url, || {
            if activated { BackoffPolicy::Exponential } else { BackoffPolicy::Aggressive }
        })
        .await;
    }

    /// `updateDenylist(url)`. Always aggressive: a missing or stale denylist
    /// is a standing gap, not a background nicety. `url: None` also deletes
    /// the local copy, since an empty denylist must not linger.
    pub async fn update_denylist(self: Arc<Self>, url: Option<String>) {
        if url.is_none() {
            let path = local_path(&self.dir, DescriptorKind::Deny);
            let _ = tokio::fs::remove_file(&path).await;
            let _ = self.store.remove_system_property(DescriptorKind::Deny.url_property_key()).await;
            let _ = self.store.remove_system_property(DescriptorKind::Deny.md5_property_key()).await;
        }
        self.restart_task(DescriptorKind::Deny, url, || BackoffPolicy::Aggressive).await;
    }

    async fn restart_task(
        self: Arc<Self>,
        kind: DescriptorKind,
        url: Option<String>,
        policy: impl FnOnce() -> BackoffPolicy,
    ) {
        let slot = match kind {
            DescriptorKind::Allow => &self.allow_task,
            DescriptorKind::Deny => &self.deny_task,
        };
        let previous = slot.lock().take();
        if let Some(task) = previous {
            task.cancel().await;
        }

        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return;
        };
        let policy = policy();
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_update_loop(kind, url, policy, token.clone()));
        *slot.lock() = Some(RunningTask { token, handle });
    }

    async fn run_update_loop(
        self: Arc<Self>,
        kind: DescriptorKind,
        url: String,
        policy: BackoffPolicy,
        token: CancellationToken,
    ) {
        let mut attempt = 0u32;
        loop {
            match self.perform_iteration(kind, &url).await {
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(list = kind.label(), %url, error = %err, attempt, "list update failed");
                    let delay = policy.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One download/validate/activate attempt. `Ok(true)` means the list
    /// content actually changed; `Ok(false)` means it was already
    /// up to date. Either is terminal for the retry loop.
    async fn perform_iteration(&self, kind: DescriptorKind, url: &str) -> Result<bool, DescriptorError> {
        let stored_url = self.store.get_system_property(kind.url_property_key()).await;
        let path = local_path(&self.dir, kind);

        let bytes = fetch_bytes(url, self.ssl_mode).await?;
        let digest = md5_hex(&bytes);

        let stored_md5 = self.store.get_system_property(kind.md5_property_key()).await;
        if stored_url.as_deref() == Some(url) && stored_md5.as_deref() == Some(digest.as_str())
            && tokio::fs::metadata(&path).await.is_ok()
        {
            self.mark_valid(kind);
            return Ok(false);
        }

        if !(self.validator)(&bytes) {
            return Err(DescriptorError::Validation);
        }

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await.map_err(|_| DescriptorError::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|_| DescriptorError::Io)?;

        self.store
            .set_system_property(kind.url_property_key(), url)
            .await
            .map_err(|_| DescriptorError::Io)?;
        self.store
            .set_system_property(kind.md5_property_key(), digest)
            .await
            .map_err(|_| DescriptorError::Io)?;

        self.mark_valid(kind);
        self.events.on_descriptor_updated(kind);
        Ok(true)
    }

    fn mark_valid(&self, kind: DescriptorKind) {
        match kind {
            DescriptorKind::Allow => self.allow_valid.store(true, Ordering::Release),
            DescriptorKind::Deny => self.deny_valid.store(true, Ordering::Release),
        }
        if self.is_allow_valid() && self.is_deny_valid()
            && self.ready_fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
        {
            self.events.on_ready_for_pairing();
        }
    }

    /// Debounces `on_fire`, restarting the window on every call. Grounded in
    /// the descriptor-reprocessing cadence: a burst of list updates in quick
    /// succession should trigger one sweep, not one per update.
    pub fn trigger_reprocess(self: Arc<Self>, on_fire: ReprocessCallback) {
        let previous = self.reprocess_task.lock().take();
        let debounce = self.reprocess_debounce;
        let token = CancellationToken::new();
        let token_for_task = token.clone();
        let handle = tokio::spawn(async move {
            if let Some(task) = previous {
                task.cancel().await;
            }
            tokio::select! {
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(debounce) => {
                    on_fire().await;
                }
            }
        });
        *self.reprocess_task.lock() = Some(RunningTask { token, handle });
    }

    /// Cancels every in-flight task (list updates and any pending
    /// reprocessing sweep) without waiting for them to observe cancellation.
    pub fn shutdown(&self) {
        for slot in [&self.allow_task, &self.deny_task, &self.reprocess_task] {
            if let Some(task) = slot.lock().take() {
                task.token.cancel();
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
