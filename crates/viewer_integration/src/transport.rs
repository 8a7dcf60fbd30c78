//! In-process host transport over broadcast channels.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use shared::protocol::HostMessage;
use tokio::sync::broadcast;

use crate::{host_message, HostTransport};

pub struct ChannelHostTransport {
    connected: AtomicBool,
    events: broadcast::Sender<HostMessage>,
    inbound: broadcast::Sender<HostMessage>,
}

impl ChannelHostTransport {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (inbound, _) = broadcast::channel(capacity.max(1));
        Self {
            connected: AtomicBool::new(true),
            events,
            inbound,
        }
    }

    /// Outbound events, in emission order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<HostMessage> {
        self.events.subscribe()
    }

    /// Pushes a named host message to whoever listens. Returns false when nobody does.
    pub fn push_message(&self, name: &str, payload: Value) -> bool {
        self.inbound.send(host_message(name, payload)).is_ok()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl HostTransport for ChannelHostTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, name: &str, payload: Value) {
        if !self.is_connected() {
            tracing::trace!(event = name, "transport disconnected; event dropped");
            return;
        }
        // No subscribers is not an error for fire-and-forget events.
        let _ = self.events.send(host_message(name, payload));
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<HostMessage> {
        self.inbound.subscribe()
    }
}
