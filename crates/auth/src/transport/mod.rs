// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context message transports.
//!
//! Two independent channels carry every protocol message: a direct window
//! reference (`postMessage`) and a same-browser broadcast bus
//! (`BroadcastChannel`). Neither is reliable on its own, so senders that
//! need delivery use both and receivers deduplicate by event id.

pub mod broadcast;
pub mod direct;
pub mod mailbox;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::Envelope;

pub use self::broadcast::BroadcastBus;
pub use self::direct::{open_window, DirectTransport, WindowRef};
pub use self::mailbox::Mailbox;

/// The three kinds of execution context taking part in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Host,
    Frame,
    Popup,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Frame => "frame",
            Self::Popup => "popup",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transport delivered a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Direct,
    Broadcast,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Identity of one context instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: Uuid,
    pub kind: ContextKind,
    pub origin: String,
}

impl Endpoint {
    pub fn new(kind: ContextKind, origin: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), kind, origin: origin.into() }
    }
}

/// A message as seen by the receiving event loop.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender: Endpoint,
    pub channel: Channel,
    /// Raw payload; decoded (and possibly discarded) by the receiver.
    pub data: Value,
    /// Direct handle back to the sender, when the transport provides one.
    pub source: Option<WindowRef>,
}

/// Why a single transport could not deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The target window is gone.
    Closed,
    /// The target window's origin does not match the requested target origin.
    OriginMismatch,
    /// Nobody is listening on the broadcast channel.
    NoListeners,
}

impl TransportError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::OriginMismatch => "origin_mismatch",
            Self::NoListeners => "no_listeners",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for TransportError {}

/// One way of getting a message to other contexts.
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    fn post(
        &self,
        from: &Endpoint,
        reply_to: Option<&WindowRef>,
        data: &Value,
    ) -> Result<(), TransportError>;
}

/// Per-channel outcome of one [`Outbox::send`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub direct: bool,
    pub broadcast: bool,
}

impl Delivery {
    pub fn any(&self) -> bool {
        self.direct || self.broadcast
    }

    pub fn count(&self) -> usize {
        usize::from(self.direct) + usize::from(self.broadcast)
    }
}

/// Sends each envelope over every configured transport.
pub struct Outbox {
    from: Endpoint,
    reply_to: Option<WindowRef>,
    transports: Vec<Box<dyn Transport>>,
}

impl Outbox {
    pub fn new(from: Endpoint) -> Self {
        Self { from, reply_to: None, transports: Vec::new() }
    }

    /// Attach the sender's own window so direct recipients can reply.
    pub fn reply_to(mut self, window: WindowRef) -> Self {
        self.reply_to = Some(window);
        self
    }

    pub fn with(mut self, transport: impl Transport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.from
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Best-effort send. Per-transport failures are logged, never returned.
    pub fn send(&self, envelope: &Envelope) -> Delivery {
        let mut delivery = Delivery::default();
        let data = match envelope.encode() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(kind = envelope.kind(), err = %e, "failed to encode message");
                return delivery;
            }
        };
        for transport in &self.transports {
            let channel = transport.channel();
            match transport.post(&self.from, self.reply_to.as_ref(), &data) {
                Ok(()) => match channel {
                    Channel::Direct => delivery.direct = true,
                    Channel::Broadcast => delivery.broadcast = true,
                },
                Err(e) => {
                    tracing::debug!(
                        from = %self.from.kind,
                        kind = envelope.kind(),
                        channel = channel.as_str(),
                        err = %e,
                        "transport did not deliver"
                    );
                }
            }
        }
        tracing::debug!(
            from = %self.from.kind,
            kind = envelope.kind(),
            id = %envelope.id,
            fresh = envelope.provenance_fresh,
            direct = delivery.direct,
            broadcast = delivery.broadcast,
            "message sent"
        );
        delivery
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
