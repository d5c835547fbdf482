// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn subscriber_receives_emitted_event() {
    let sink = ChannelEventSink::new(16);
    let mut rx = sink.subscribe();
    sink.emit(GatewayEvent::DeviceAdded { uuid: "dev1".into() });

    let received = rx.try_recv().expect("event should be queued");
    match received.as_ref() {
        GatewayEvent::DeviceAdded { uuid } => assert_eq!(uuid, "dev1"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn emit_with_no_subscribers_does_not_panic() {
    let sink = ChannelEventSink::new(16);
    sink.emit(GatewayEvent::ServiceStatusChanged { available: true });
}

#[test]
fn kind_tags_are_stable_strings() {
    assert_eq!(GatewayEvent::DeviceAdded { uuid: "x".into() }.kind(), "deviceAdded");
    assert_eq!(
        GatewayEvent::DiscoveryStarted { classes: vec![], timeout_secs: 0, find_orphans: false }
            .kind(),
        "discoveryStarted"
    );
}
