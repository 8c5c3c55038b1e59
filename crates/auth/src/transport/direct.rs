// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Direct window references (`window.parent`, `iframe.contentWindow`,
//! `window.opener`).

use serde_json::Value;
use tokio::sync::mpsc;

use crate::origin;
use crate::transport::{Channel, ContextKind, Endpoint, Inbound, Transport, TransportError};

/// Handle to another context's inbox.
#[derive(Debug, Clone)]
pub struct WindowRef {
    endpoint: Endpoint,
    tx: mpsc::UnboundedSender<Inbound>,
}

/// Create a window for a new context: the handle peers post to, and the
/// receiving end its event loop drains.
pub fn open_window(
    kind: ContextKind,
    origin: impl Into<String>,
) -> (WindowRef, mpsc::UnboundedReceiver<Inbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WindowRef { endpoint: Endpoint::new(kind, origin), tx }, rx)
}

impl WindowRef {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the window's event loop has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Deliver `data` if this window's origin matches `target_origin`
    /// (`"*"` matches anything).
    pub fn post_message(
        &self,
        from: &Endpoint,
        source: Option<&WindowRef>,
        data: &Value,
        target_origin: &str,
    ) -> Result<(), TransportError> {
        if target_origin != "*"
            && origin::normalize(target_origin) != origin::normalize(&self.endpoint.origin)
        {
            return Err(TransportError::OriginMismatch);
        }
        let inbound = Inbound {
            sender: from.clone(),
            channel: Channel::Direct,
            data: data.clone(),
            source: source.cloned(),
        };
        self.tx.send(inbound).map_err(|_| TransportError::Closed)
    }
}

/// A [`WindowRef`] bound to a target origin.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    window: WindowRef,
    target_origin: String,
}

impl DirectTransport {
    pub fn new(window: WindowRef, target_origin: impl Into<String>) -> Self {
        Self { window, target_origin: target_origin.into() }
    }

    pub fn window(&self) -> &WindowRef {
        &self.window
    }
}

impl Transport for DirectTransport {
    fn channel(&self) -> Channel {
        Channel::Direct
    }

    fn post(
        &self,
        from: &Endpoint,
        reply_to: Option<&WindowRef>,
        data: &Value,
    ) -> Result<(), TransportError> {
        self.window.post_message(from, reply_to, data, &self.target_origin)
    }
}
