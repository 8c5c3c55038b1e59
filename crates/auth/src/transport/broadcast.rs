// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Same-browser broadcast channel.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::transport::{Channel, Endpoint, Inbound, Transport, TransportError, WindowRef};

/// Default broadcast channel name.
pub const DEFAULT_CHANNEL_NAME: &str = "tryon-auth";

/// Named broadcast bus shared by every context in one browser profile.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    name: String,
    tx: broadcast::Sender<Inbound>,
}

impl BroadcastBus {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { name: name.into(), tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.tx.subscribe()
    }
}

impl Transport for BroadcastBus {
    fn channel(&self) -> Channel {
        Channel::Broadcast
    }

    fn post(
        &self,
        from: &Endpoint,
        _reply_to: Option<&WindowRef>,
        data: &Value,
    ) -> Result<(), TransportError> {
        let inbound = Inbound {
            sender: from.clone(),
            channel: Channel::Broadcast,
            data: data.clone(),
            source: None,
        };
        self.tx.send(inbound).map(|_| ()).map_err(|_| TransportError::NoListeners)
    }
}
