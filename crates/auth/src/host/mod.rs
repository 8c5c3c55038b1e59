// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host page context: answers token requests from embedded frames and keeps
//! the token store in step with sign-in, sign-out and invalidation.

pub mod refresh;
pub mod scheduler;
pub mod token_store;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::origin::OriginPolicy;
use crate::protocol::{Envelope, Message, Presentation};
use crate::provenance::SeenEvents;
use crate::storage::KeyValueStore;
use crate::token::fingerprint;
use crate::transport::{DirectTransport, Endpoint, Inbound, Mailbox, Outbox, WindowRef};

use self::token_store::{StoreEvent, TokenRecord, TokenStore};

/// Host-local flag recording that the signed-in visitor finished onboarding.
pub const ONBOARDING_KEY: &str = "tryon.onboarding_complete";

/// Where a host message goes.
#[derive(Debug, Clone)]
pub enum Target {
    /// The frame that asked.
    Reply(WindowRef),
    /// Every frame the host knows about.
    AllFrames,
    /// Every known frame except the one with this endpoint id.
    OtherFrames(uuid::Uuid),
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub envelope: Envelope,
}

impl Outbound {
    fn new(target: Target, message: Message) -> Self {
        Self { target, envelope: Envelope::replay(message) }
    }
}

/// Observable host state, published after every inbound message.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HostView {
    pub frames: usize,
    pub presentation: Presentation,
    /// Success-class messages that reached the host, duplicates included.
    pub success_messages: u32,
}

/// Host-side dispatcher. Each handler maps one inbound message to token
/// store calls plus the messages to send back.
pub struct Host {
    window: WindowRef,
    store: Arc<TokenStore>,
    kv: Arc<dyn KeyValueStore>,
    origins: OriginPolicy,
    seen: SeenEvents,
    frames: Vec<WindowRef>,
    presentation: Presentation,
    success_messages: u32,
    view: watch::Sender<HostView>,
}

impl Host {
    pub fn new(
        window: WindowRef,
        store: Arc<TokenStore>,
        kv: Arc<dyn KeyValueStore>,
        origins: OriginPolicy,
        dedupe_window: usize,
    ) -> Self {
        Self {
            window,
            store,
            kv,
            origins,
            seen: SeenEvents::new(dedupe_window),
            frames: Vec::new(),
            presentation: Presentation::default(),
            success_messages: 0,
            view: watch::channel(HostView::default()).0,
        }
    }

    pub fn watch(&self) -> watch::Receiver<HostView> {
        self.view.subscribe()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.window.endpoint()
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Track a frame this page embedded (its `contentWindow`).
    pub fn attach_frame(&mut self, frame: WindowRef) {
        self.frames.retain(|w| !w.is_closed());
        if !self.frames.iter().any(|w| w.endpoint().id == frame.endpoint().id) {
            tracing::debug!(frame = %frame.endpoint().id, "frame attached");
            self.frames.push(frame);
        }
    }

    pub fn onboarding_complete(&self) -> bool {
        match self.kv.get(ONBOARDING_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!(err = %e, "onboarding flag unreadable, treating as incomplete");
                false
            }
        }
    }

    pub fn handle(&mut self, inbound: &Inbound) -> Vec<Outbound> {
        let out = self.dispatch(inbound);
        self.publish();
        out
    }

    fn publish(&self) {
        let view = HostView {
            frames: self.frames.len(),
            presentation: self.presentation,
            success_messages: self.success_messages,
        };
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn dispatch(&mut self, inbound: &Inbound) -> Vec<Outbound> {
        if !self.origins.accepts(&inbound.sender.origin) {
            tracing::debug!(origin = %inbound.sender.origin, "discarding message from unexpected origin");
            return Vec::new();
        }
        let Some(envelope) = Envelope::decode(&inbound.data) else {
            return Vec::new();
        };
        if envelope.message.is_success_class() {
            self.success_messages += 1;
        }
        // A frame whose first message is a duplicate still needs pushes.
        if let Some(source) = inbound.source.as_ref() {
            self.attach_frame(source.clone());
        }
        if !self.seen.first_sighting(envelope.id) {
            tracing::debug!(kind = envelope.kind(), id = %envelope.id, "duplicate message ignored");
            return Vec::new();
        }

        tracing::debug!(
            kind = envelope.kind(),
            from = %inbound.sender.kind,
            channel = inbound.channel.as_str(),
            fresh = envelope.provenance_fresh,
            "host received message"
        );

        match envelope.message {
            Message::AuthRequest => self.on_auth_request(inbound),
            Message::AuthSuccess { access_token, refresh_token, expires_in_seconds } => {
                let record = self.store.set(access_token, refresh_token, expires_in_seconds);
                tracing::info!(
                    token_fp = %fingerprint(&record.access_token),
                    fresh = envelope.provenance_fresh,
                    "sign-in applied"
                );
                Vec::new()
            }
            Message::SignOut | Message::SignOutRequest => {
                self.end_session();
                tracing::info!("signed out");
                vec![Outbound::new(Target::OtherFrames(inbound.sender.id), Message::SignOut)]
            }
            Message::AuthInvalid { reason } => {
                tracing::info!(reason = %reason, "frame reported token invalid");
                self.end_session();
                vec![Outbound::new(Target::OtherFrames(inbound.sender.id), Message::AuthInvalid {
                    reason,
                })]
            }
            Message::OnboardingComplete => {
                if let Err(e) = self.kv.set(ONBOARDING_KEY, "true") {
                    tracing::warn!(err = %e, "failed to persist onboarding flag");
                }
                Vec::new()
            }
            Message::Expand => {
                self.presentation = Presentation::Expanded;
                Vec::new()
            }
            Message::Collapse => {
                self.presentation = Presentation::Collapsed;
                Vec::new()
            }
            Message::AuthCancelled | Message::AuthToken { .. } | Message::OnboardingStatus { .. } => {
                Vec::new()
            }
        }
    }

    /// Translate an autonomous store change into frame notifications.
    pub fn on_store_event(&self, event: &StoreEvent) -> Vec<Outbound> {
        match event {
            StoreEvent::Refreshed(record) => {
                vec![Outbound::new(Target::AllFrames, self.token_message(record))]
            }
            StoreEvent::Invalidated { reason } => {
                // The store already cleared itself.
                self.forget_onboarding();
                vec![Outbound::new(
                    Target::AllFrames,
                    Message::AuthInvalid { reason: reason.as_str().to_owned() },
                )]
            }
        }
    }

    fn on_auth_request(&mut self, inbound: &Inbound) -> Vec<Outbound> {
        let target = self.reply_target(inbound);
        let Some(record) = self.store.get() else {
            tracing::debug!("no cached token for frame");
            return Vec::new();
        };
        let now = self.store_now();
        if record.is_valid_at(now) {
            return vec![
                Outbound::new(target.clone(), self.token_message(&record)),
                Outbound::new(
                    target,
                    Message::OnboardingStatus { is_complete: self.onboarding_complete() },
                ),
            ];
        }
        if record.refresh_token.is_some() {
            // Expired but refreshable: the refreshed push answers the frame.
            tracing::debug!("cached token expired, refreshing before answering");
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                store.refresh_expired().await;
            });
        }
        Vec::new()
    }

    fn reply_target(&self, inbound: &Inbound) -> Target {
        match inbound.source.as_ref() {
            Some(source) => Target::Reply(source.clone()),
            None => self
                .frames
                .iter()
                .find(|w| w.endpoint().id == inbound.sender.id)
                .map_or(Target::AllFrames, |w| Target::Reply(w.clone())),
        }
    }

    fn token_message(&self, record: &TokenRecord) -> Message {
        Message::AuthToken {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            expires_in_seconds: Some(record.remaining_secs(self.store_now())),
        }
    }

    fn store_now(&self) -> u64 {
        self.store.now_ms()
    }

    /// Drop the token and the onboarding flag tied to its profile.
    fn end_session(&self) {
        self.store.clear();
        self.forget_onboarding();
    }

    fn forget_onboarding(&self) {
        if let Err(e) = self.kv.remove(ONBOARDING_KEY) {
            tracing::warn!(err = %e, "failed to forget onboarding flag");
        }
    }

    /// Post each outbound message over the direct channel.
    pub fn deliver(&mut self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        self.frames.retain(|w| !w.is_closed());
        for out in outbound {
            let targets: Vec<WindowRef> = match &out.target {
                Target::Reply(window) => vec![window.clone()],
                Target::AllFrames => self.frames.clone(),
                Target::OtherFrames(except) => {
                    self.frames.iter().filter(|w| w.endpoint().id != *except).cloned().collect()
                }
            };
            for window in targets {
                let origin = window.endpoint().origin.clone();
                let outbox = Outbox::new(self.endpoint().clone())
                    .reply_to(self.window.clone())
                    .with(DirectTransport::new(window, origin));
                outbox.send(&out.envelope);
            }
        }
    }

    /// Host event loop: inbound messages and store events until shutdown or
    /// until the host window closes.
    pub async fn run(
        mut self,
        mut mailbox: Mailbox,
        mut events: broadcast::Receiver<StoreEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                inbound = mailbox.recv() => {
                    let Some(inbound) = inbound else { break };
                    let out = self.handle(&inbound);
                    self.deliver(out);
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        let out = self.on_store_event(&event);
                        self.deliver(out);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "host lagged behind store events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("host loop exited");
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
