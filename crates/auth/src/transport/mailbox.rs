// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-context inbox merging both transports.

use tokio::sync::{broadcast, mpsc};

use crate::transport::{BroadcastBus, Channel, Endpoint, Inbound};

enum Next {
    Direct(Option<Inbound>),
    Broadcast(Result<Inbound, broadcast::error::RecvError>),
}

/// Everything addressed to one context, in per-channel arrival order.
pub struct Mailbox {
    me: Endpoint,
    direct: mpsc::UnboundedReceiver<Inbound>,
    broadcast: Option<broadcast::Receiver<Inbound>>,
}

impl Mailbox {
    pub fn new(me: Endpoint, direct: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self { me, direct, broadcast: None }
    }

    /// Also listen on `bus`.
    pub fn with_broadcast(mut self, bus: &BroadcastBus) -> Self {
        self.broadcast = Some(bus.subscribe());
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.me
    }

    /// Next inbound message. Returns `None` once the direct inbox closes.
    pub async fn recv(&mut self) -> Option<Inbound> {
        loop {
            let next = match self.broadcast.as_mut() {
                Some(rx) => tokio::select! {
                    msg = self.direct.recv() => Next::Direct(msg),
                    msg = rx.recv() => Next::Broadcast(msg),
                },
                None => Next::Direct(self.direct.recv().await),
            };

            match next {
                Next::Direct(msg) => return msg,
                Next::Broadcast(Ok(msg)) => {
                    if self.is_own_broadcast(&msg) {
                        continue;
                    }
                    return Some(msg);
                }
                Next::Broadcast(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::debug!(context = %self.me.kind, skipped = n, "broadcast receiver lagged");
                    continue;
                }
                Next::Broadcast(Err(broadcast::error::RecvError::Closed)) => {
                    self.broadcast = None;
                    continue;
                }
            }
        }
    }

    /// Broadcast channels do not deliver to the posting context.
    fn is_own_broadcast(&self, msg: &Inbound) -> bool {
        msg.channel == Channel::Broadcast && msg.sender.id == self.me.id
    }
}
