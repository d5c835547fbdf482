// SPDX-License-Identifier: Apache-2.0

//! Emitted events: every state transition the lifecycle coordinator, object
//! store, and watchdog produce that an upstream UI or automation layer
//! needs visibility into. "Logging/event-bus wiring" is out of scope as a
//! *transport*, but events must still go somewhere observable — every
//! `emit` both broadcasts to subscribers and logs at `info`, so the system
//! is observable even with zero subscribers attached.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

/// Every event the core can emit, tagged with enough context (UUID, device
/// class, reason) for a subscriber to act without a follow-up query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum GatewayEvent {
    DiscoveryStarted { classes: Vec<String>, timeout_secs: u64, find_orphans: bool },
    DiscoveryStopped { device_class: String, all_started: bool },
    RecoveryStopped { device_class: String, all_started: bool },
    DeviceDiscovered { uuid: String, device_class: String },
    DeviceConfigureStarted { uuid: String },
    DeviceConfigureCompleted { uuid: String },
    DeviceConfigureFailed { uuid: String },
    DeviceDiscoveryCompleted { uuid: String },
    DeviceDiscoveryFailed { uuid: String, reason: String },
    DeviceRejected { uuid: String, reason: String },
    DeviceAdded { uuid: String },
    DeviceRemoved { uuid: String },
    DeviceRecovered { uuid: String },
    EndpointAdded { uuid: String, endpoint_id: String },
    EndpointRemoved { uuid: String, endpoint_id: String },
    ResourceUpdated { uri: String },
    ServiceStatusChanged { available: bool },
    DeviceDatabaseFailure { file_name: String },
}

impl GatewayEvent {
    /// A short, stable tag used for the `event` field in the `tracing::info!`
    /// call every emit performs, regardless of subscriber count.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DiscoveryStarted { .. } => "discoveryStarted",
            Self::DiscoveryStopped { .. } => "discoveryStopped",
            Self::RecoveryStopped { .. } => "recoveryStopped",
            Self::DeviceDiscovered { .. } => "deviceDiscovered",
            Self::DeviceConfigureStarted { .. } => "deviceConfigureStarted",
            Self::DeviceConfigureCompleted { .. } => "deviceConfigureCompleted",
            Self::DeviceConfigureFailed { .. } => "deviceConfigureFailed",
            Self::DeviceDiscoveryCompleted { .. } => "deviceDiscoveryCompleted",
            Self::DeviceDiscoveryFailed { .. } => "deviceDiscoveryFailed",
            Self::DeviceRejected { .. } => "deviceRejected",
            Self::DeviceAdded { .. } => "deviceAdded",
            Self::DeviceRemoved { .. } => "deviceRemoved",
            Self::DeviceRecovered { .. } => "deviceRecovered",
            Self::EndpointAdded { .. } => "endpointAdded",
            Self::EndpointRemoved { .. } => "endpointRemoved",
            Self::ResourceUpdated { .. } => "resourceUpdated",
            Self::ServiceStatusChanged { .. } => "serviceStatusChanged",
            Self::DeviceDatabaseFailure { .. } => "deviceDatabaseFailure",
        }
    }
}

/// Where emitted events go. Each emitter is delivered events serially —
/// `emit` never runs concurrently with itself on the same sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GatewayEvent);
}

/// Default sink: a `broadcast` channel any number of subscribers can drain,
/// mirroring the teacher's aggregator/broadcast pattern. Lagging
/// subscribers drop old events rather than stall emitters.
pub struct ChannelEventSink {
    tx: broadcast::Sender<Arc<GatewayEvent>>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: GatewayEvent) {
        tracing::info!(event = event.kind(), "{:?}", event);
        let _ = self.tx.send(Arc::new(event));
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
