// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Widget frame context: drives a [`SessionController`] from its mailbox,
//! UI commands and the cache-wait timer, and carries out its effects.

pub mod session;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::origin::OriginPolicy;
use crate::protocol::{Envelope, Presentation};
use crate::storage::KeyValueStore;
use crate::transport::{
    BroadcastBus, DirectTransport, Endpoint, Inbound, Mailbox, Outbox, WindowRef,
};

use self::session::{Effect, Input, SessionConfig, SessionController, SessionState, SessionToken};

/// Frame-local copy of the session (JSON [`SessionToken`]).
pub const SESSION_KEY: &str = "tryon.session";
/// Frame-local onboarding completion flag.
pub const ONBOARDING_KEY: &str = "tryon.onboarding_complete";

/// Something the widget UI should show besides its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    AllowPopups,
    NavigatedToSignIn,
}

/// Observable frame state, published after every input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameView {
    pub state: SessionState,
    pub access_token: Option<String>,
    pub onboarding_complete: bool,
    pub awaiting_popup: bool,
    pub try_on_resets: u32,
    pub notice: Option<Notice>,
    /// Success-class messages that reached this frame, duplicates included.
    pub success_messages: u32,
}

impl FrameView {
    fn initial() -> Self {
        Self {
            state: SessionState::Uninitialized,
            access_token: None,
            onboarding_complete: false,
            awaiting_popup: false,
            try_on_resets: 0,
            notice: None,
            success_messages: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    SignInRequested { popup_opened: bool },
    OnboardingCompleted,
    SignOut,
    TokenRejected { reason: String },
    Present(Presentation),
}

/// Everything a frame needs to run.
pub struct FrameOptions {
    pub window: WindowRef,
    pub inbox: mpsc::UnboundedReceiver<Inbound>,
    /// `window.parent`.
    pub parent: WindowRef,
    pub host_origin: String,
    pub bus: Option<BroadcastBus>,
    pub kv: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub origins: OriginPolicy,
    pub session: SessionConfig,
    pub shutdown: CancellationToken,
}

/// UI-side handle to a running frame.
#[derive(Debug, Clone)]
pub struct FrameHandle {
    window: WindowRef,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<FrameView>,
}

impl FrameHandle {
    pub fn window(&self) -> &WindowRef {
        &self.window
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.window.endpoint()
    }

    pub fn sign_in_requested(&self, popup_opened: bool) {
        self.command(Command::SignInRequested { popup_opened });
    }

    pub fn onboarding_completed(&self) {
        self.command(Command::OnboardingCompleted);
    }

    pub fn sign_out(&self) {
        self.command(Command::SignOut);
    }

    pub fn token_rejected(&self, reason: impl Into<String>) {
        self.command(Command::TokenRejected { reason: reason.into() });
    }

    pub fn present(&self, presentation: Presentation) {
        self.command(Command::Present(presentation));
    }

    pub fn view(&self) -> FrameView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FrameView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `pred`. Returns `None` if the frame
    /// stopped first.
    pub async fn wait_for(&self, pred: impl FnMut(&FrameView) -> bool) -> Option<FrameView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(pred).await.ok()?.clone();
        Some(view)
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(frame = %self.window.endpoint().id, "frame stopped, command dropped");
        }
    }
}

pub struct Frame {
    controller: SessionController,
    outbox: Outbox,
    kv: Arc<dyn KeyValueStore>,
    origins: OriginPolicy,
    view: FrameView,
    view_tx: watch::Sender<FrameView>,
    cache_deadline: Option<Instant>,
}

impl Frame {
    /// Start the frame's event loop.
    pub fn spawn(opts: FrameOptions) -> FrameHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(FrameView::initial());

        let endpoint = opts.window.endpoint().clone();
        let outbox = Outbox::new(endpoint.clone())
            .reply_to(opts.window.clone())
            .with(DirectTransport::new(opts.parent, opts.host_origin));
        let mut mailbox = Mailbox::new(endpoint, opts.inbox);
        if let Some(bus) = opts.bus.as_ref() {
            mailbox = mailbox.with_broadcast(bus);
        }

        let frame = Self {
            controller: SessionController::new(opts.session, opts.clock),
            outbox,
            kv: opts.kv,
            origins: opts.origins,
            view: FrameView::initial(),
            view_tx,
            cache_deadline: None,
        };
        tokio::spawn(frame.run(mailbox, cmd_rx, opts.shutdown));

        FrameHandle { window: opts.window, commands: cmd_tx, view: view_rx }
    }

    async fn run(
        mut self,
        mut mailbox: Mailbox,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) {
        self.step(Input::Load);
        let local = self.read_local();
        self.step(local);

        loop {
            let deadline = self.cache_deadline;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                inbound = mailbox.recv() => {
                    let Some(inbound) = inbound else { break };
                    if let Some(envelope) = self.accept(&inbound) {
                        self.step(Input::Inbound(envelope));
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.step(match command {
                        Command::SignInRequested { popup_opened } => Input::SignInRequested { popup_opened },
                        Command::OnboardingCompleted => Input::OnboardingCompleted,
                        Command::SignOut => Input::SignOut,
                        Command::TokenRejected { reason } => Input::TokenRejected { reason },
                        Command::Present(p) => Input::Present(p),
                    });
                }
                _ = sleep_until(deadline) => {
                    self.cache_deadline = None;
                    self.step(Input::CacheTimeout);
                }
            }
        }
        tracing::debug!(frame = %self.outbox.endpoint().id, "frame loop exited");
    }

    /// Origin check and decode. Counts success-class arrivals before
    /// deduplication.
    fn accept(&mut self, inbound: &Inbound) -> Option<Envelope> {
        if !self.origins.accepts(&inbound.sender.origin) {
            tracing::debug!(origin = %inbound.sender.origin, "discarding message from unexpected origin");
            return None;
        }
        let envelope = Envelope::decode(&inbound.data)?;
        if envelope.message.is_success_class() {
            self.view.success_messages += 1;
        }
        tracing::debug!(
            kind = envelope.kind(),
            from = %inbound.sender.kind,
            channel = inbound.channel.as_str(),
            fresh = envelope.provenance_fresh,
            "frame received message"
        );
        Some(envelope)
    }

    fn step(&mut self, input: Input) {
        for effect in self.controller.handle(input) {
            self.apply(effect);
        }
        self.view.state = self.controller.state().clone();
        self.view.access_token = self.controller.token().map(|t| t.access_token.clone());
        self.view.onboarding_complete = self.controller.onboarding_complete();
        self.view.awaiting_popup = self.controller.awaiting_popup();
        if self.view.state.is_signed_in() {
            self.view.notice = None;
        }
        let view = self.view.clone();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::SendToHost(envelope) => {
                self.outbox.send(&envelope);
            }
            Effect::PersistSession(token) => match serde_json::to_string(&token) {
                Ok(json) => self.write(SESSION_KEY, Some(&json)),
                Err(e) => tracing::warn!(err = %e, "failed to encode session"),
            },
            Effect::ClearSession => self.write(SESSION_KEY, None),
            Effect::PersistOnboarding => self.write(ONBOARDING_KEY, Some("true")),
            Effect::ClearOnboarding => self.write(ONBOARDING_KEY, None),
            Effect::ArmCacheTimer(wait) => self.cache_deadline = Some(Instant::now() + wait),
            Effect::CancelCacheTimer => self.cache_deadline = None,
            Effect::ResetTryOn => self.view.try_on_resets += 1,
            Effect::PromptAllowPopups => self.view.notice = Some(Notice::AllowPopups),
            Effect::NavigateToSignIn => self.view.notice = Some(Notice::NavigatedToSignIn),
        }
    }

    /// Best-effort local write; the controller's copy stays authoritative.
    fn write(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.kv.set(key, value),
            None => self.kv.remove(key),
        };
        if let Err(e) = result {
            tracing::warn!(key, err = %e, "frame storage write failed");
        }
    }

    fn read_local(&self) -> Input {
        let session = match self.kv.get(SESSION_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<SessionToken>(&json) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::debug!(err = %e, "unparsable local session");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(err = %e, "frame storage unreadable, treating as empty");
                None
            }
        };
        let onboarding_complete = matches!(self.kv.get(ONBOARDING_KEY), Ok(Some(v)) if v == "true");
        Input::LocalSession { session, onboarding_complete }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
