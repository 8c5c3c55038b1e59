// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sign-in popup: announces the outcome of an interactive sign-in to the
//! frame that opened it.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::protocol::{Envelope, Message};
use crate::token::{fingerprint, TokenGrant};
use crate::transport::{
    BroadcastBus, ContextKind, Delivery, DirectTransport, Endpoint, Outbox, WindowRef,
};

const OPEN: u8 = 0;
const SUCCEEDED: u8 = 1;
const CANCELLED: u8 = 2;

/// One-shot outcome cell. Exactly one of success or cancellation is ever
/// claimed.
#[derive(Debug, Default)]
pub struct CancellationWatch {
    state: AtomicU8,
}

impl CancellationWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the success outcome. Must happen before the success message is
    /// sent.
    pub fn claim_success(&self) -> bool {
        self.state.compare_exchange(OPEN, SUCCEEDED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn claim_cancel(&self) -> bool {
        self.state.compare_exchange(OPEN, CANCELLED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn succeeded(&self) -> bool {
        self.state.load(Ordering::Acquire) == SUCCEEDED
    }

    pub fn cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// How a popup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupOutcome {
    SignedIn(Delivery),
    Cancelled,
}

pub struct Popup {
    outbox: Outbox,
    watch: CancellationWatch,
}

impl fmt::Debug for Popup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Popup")
            .field("endpoint", self.outbox.endpoint())
            .field("watch", &self.watch)
            .finish()
    }
}

impl Popup {
    /// `opener` is `window.opener`, absent when the browser severed it. The
    /// popup shares the widget's origin, so direct sends target it.
    pub fn new(origin: &str, opener: Option<WindowRef>, bus: Option<BroadcastBus>) -> Self {
        let mut outbox = Outbox::new(Endpoint::new(ContextKind::Popup, origin));
        if let Some(opener) = opener {
            outbox = outbox.with(DirectTransport::new(opener, origin));
        }
        if let Some(bus) = bus {
            outbox = outbox.with(bus);
        }
        if outbox.is_empty() {
            tracing::warn!("popup has neither an opener nor a broadcast channel");
        }
        Self { outbox, watch: CancellationWatch::new() }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.outbox.endpoint()
    }

    pub fn watch(&self) -> &CancellationWatch {
        &self.watch
    }

    /// Send a fresh `auth-success` over every transport. Returns `None` if
    /// the popup already announced or cancelled.
    pub fn announce_success(&self, grant: &TokenGrant) -> Option<Delivery> {
        if !self.watch.claim_success() {
            tracing::debug!("popup outcome already settled, success not announced");
            return None;
        }
        let delivery = self.outbox.send(&Envelope::fresh(Message::auth_success(grant)));
        tracing::info!(
            token_fp = %fingerprint(&grant.access_token),
            direct = delivery.direct,
            broadcast = delivery.broadcast,
            "sign-in announced"
        );
        Some(delivery)
    }

    /// Announce cancellation unless success was already claimed. Returns
    /// whether `auth-cancelled` was sent by this call.
    pub fn teardown(&self) -> bool {
        if !self.watch.claim_cancel() {
            return false;
        }
        let delivery = self.outbox.send(&Envelope::fresh(Message::AuthCancelled));
        tracing::info!(delivered = delivery.any(), "sign-in cancelled");
        true
    }

    /// Drive an interactive sign-in to completion and announce its result.
    pub async fn run<F, E>(self, sign_in: F) -> PopupOutcome
    where
        F: Future<Output = Result<Option<TokenGrant>, E>>,
        E: fmt::Display,
    {
        match sign_in.await {
            Ok(Some(grant)) => match self.announce_success(&grant) {
                Some(delivery) => PopupOutcome::SignedIn(delivery),
                None => PopupOutcome::Cancelled,
            },
            Ok(None) => {
                self.teardown();
                PopupOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!(err = %e, "sign-in failed");
                self.teardown();
                PopupOutcome::Cancelled
            }
        }
    }
}

impl Drop for Popup {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "popup_tests.rs"]
mod tests;
