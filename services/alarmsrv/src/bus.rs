//! Platform Message Bus
//!
//! Fire-and-forget fan-out of subsystem events to the rest of the platform
//! (rules, notifications, UI push). Publishing never blocks the alarm
//! dispatch path and never fails it; with no subscribers messages are
//! dropped.

use haven_model::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// What a platform message announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A model attribute changed
    ValueChange,
    /// An incident opened for a place
    IncidentOpened,
    /// The open incident gained triggers or another alarm type
    IncidentUpdated,
    /// The open incident was cancelled
    IncidentCancelled,
    /// A command was written to a device model
    DeviceCommand,
}

/// One message on the platform bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMessage {
    /// Model the message is about
    pub source: Address,
    /// Directed recipient; `None` for broadcasts
    pub destination: Option<Address>,
    /// Message kind
    pub kind: MessageKind,
    /// Kind-specific payload
    pub payload: Value,
}

impl PlatformMessage {
    pub fn new(source: Address, kind: MessageKind, payload: Value) -> Self {
        Self {
            source,
            destination: None,
            kind,
            payload,
        }
    }

    /// Direct the message at one recipient
    pub fn to(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }
}

/// Outbound message fan-out; never blocks, never fails the caller
pub trait PlatformBus: Send + Sync {
    /// Deliver a message to one recipient
    fn send(&self, destination: &Address, message: PlatformMessage);

    /// Announce a message to every listener
    fn broadcast(&self, message: PlatformMessage);
}

/// Broadcast-channel bus
///
/// Slow subscribers lag and drop rather than backpressuring the publisher.
pub struct BroadcastBus {
    sender: broadcast::Sender<PlatformMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to everything published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformMessage> {
        self.sender.subscribe()
    }
}

impl BroadcastBus {
    fn publish(&self, message: PlatformMessage) {
        // send only errors when nobody is subscribed
        if self.sender.send(message).is_err() {
            debug!("platform message dropped, no subscribers");
        }
    }
}

impl PlatformBus for BroadcastBus {
    fn send(&self, destination: &Address, message: PlatformMessage) {
        self.publish(message.to(destination.clone()));
    }

    fn broadcast(&self, message: PlatformMessage) {
        self.publish(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_published_messages() {
        let bus = BroadcastBus::new(16);
        let mut rx = bus.subscribe();

        bus.broadcast(PlatformMessage::new(
            Address::device("door-1"),
            MessageKind::ValueChange,
            json!({"key": "cont:contact", "new": "OPENED"}),
        ));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.kind, MessageKind::ValueChange);
        assert_eq!(msg.source, Address::device("door-1"));
        assert!(msg.destination.is_none());
    }

    #[tokio::test]
    async fn test_send_carries_destination() {
        let bus = BroadcastBus::new(4);
        let mut rx = bus.subscribe();
        let valve = Address::device("valve-1");

        bus.send(
            &valve,
            PlatformMessage::new(
                Address::service("p1", "alarm"),
                MessageKind::DeviceCommand,
                json!({"valv:valvestate": "CLOSED"}),
            ),
        );
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.destination, Some(valve));
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let bus = BroadcastBus::new(4);
        bus.broadcast(PlatformMessage::new(
            Address::device("door-1"),
            MessageKind::DeviceCommand,
            json!({}),
        ));
    }
}
