//! Async message bus — the seam between the gateway and the agent pipeline.
//!
//! The cron engine and heartbeat cycle produce inbound messages; whatever
//! consumes the receiver (the agent loop, in the full assistant) is outside
//! this crate's boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InboundMessage {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// Capacity of the internal channel.
const BUS_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(BUS_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
        }
    }

    /// Get a sender handle used to push inbound messages.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Take the inbound receiver (can only be called once — the consumer owns it).
    pub fn take_inbound_receiver(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.take()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
