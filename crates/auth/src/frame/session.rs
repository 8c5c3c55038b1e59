// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Widget session state machine.
//!
//! [`SessionController::handle`] is a pure transition function: it consumes
//! one [`Input`] and returns the [`Effect`]s the frame runtime must carry
//! out. No I/O happens here.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::PopupFallback;
use crate::error::FailureKind;
use crate::protocol::{Envelope, Message, Presentation};
use crate::provenance::{self, SeenEvents};
use crate::token::fingerprint;
use crate::transport::ContextKind;

/// The frame's copy of the visitor's token. Never authoritative; the host
/// store owns the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl SessionToken {
    /// Extract the token carried by a success-class message.
    pub fn from_message(message: &Message, now_ms: u64) -> Option<Self> {
        let (access_token, refresh_token, expires_in) = match message {
            Message::AuthSuccess { access_token, refresh_token, expires_in_seconds } => {
                (access_token, refresh_token, Some(*expires_in_seconds))
            }
            Message::AuthToken { access_token, refresh_token, expires_in_seconds } => {
                (access_token, refresh_token, *expires_in_seconds)
            }
            _ => return None,
        };
        if access_token.is_empty() {
            return None;
        }
        Some(Self {
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            expires_at_ms: expires_in.map(|s| now_ms.saturating_add(s.saturating_mul(1000))),
        })
    }

    pub fn is_usable_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    CheckingCache,
    Unauthenticated,
    Authenticated { token: SessionToken },
    NeedsOnboarding,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::CheckingCache => "checking_cache",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated { .. } => "authenticated",
            Self::NeedsOnboarding => "needs_onboarding",
            Self::Ready => "ready",
        }
    }

    /// States in which the frame holds a token.
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::Authenticated { .. } | Self::NeedsOnboarding | Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// The frame document loaded.
    Load,
    /// Result of reading the frame's own persistent store.
    LocalSession { session: Option<SessionToken>, onboarding_complete: bool },
    /// An origin-checked message from the host or the popup.
    Inbound(Envelope),
    /// The bounded wait for a cached token ran out.
    CacheTimeout,
    /// The visitor pressed sign-in; `popup_opened` is false when blocked.
    SignInRequested { popup_opened: bool },
    /// The visitor finished onboarding in this frame.
    OnboardingCompleted,
    /// The visitor pressed sign-out in this frame.
    SignOut,
    /// A backend call made with the frame's token was rejected; `reason` is
    /// the backend's detail, for logs.
    TokenRejected { reason: String },
    /// The widget changed its presentation.
    Present(Presentation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendToHost(Envelope),
    PersistSession(SessionToken),
    ClearSession,
    PersistOnboarding,
    ClearOnboarding,
    ArmCacheTimer(Duration),
    CancelCacheTimer,
    /// Drop any in-flight try-on work and results.
    ResetTryOn,
    PromptAllowPopups,
    NavigateToSignIn,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cache_wait: Duration,
    pub popup_fallback: PopupFallback,
    pub dedupe_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_wait: Duration::from_millis(1500),
            popup_fallback: PopupFallback::default(),
            dedupe_window: provenance::DEFAULT_DEDUPE_WINDOW,
        }
    }
}

pub struct SessionController {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    state: SessionState,
    token: Option<SessionToken>,
    local_onboarding: bool,
    host_onboarding: Option<bool>,
    awaiting_popup: bool,
    seen: SeenEvents,
}

impl SessionController {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let seen = SeenEvents::new(config.dedupe_window);
        Self {
            config,
            clock,
            state: SessionState::Uninitialized,
            token: None,
            local_onboarding: false,
            host_onboarding: None,
            awaiting_popup: false,
            seen,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub fn onboarding_complete(&self) -> bool {
        self.local_onboarding || self.host_onboarding == Some(true)
    }

    /// Whether a sign-in popup is open and unresolved.
    pub fn awaiting_popup(&self) -> bool {
        self.awaiting_popup
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Load => self.on_load(&mut effects),
            Input::LocalSession { session, onboarding_complete } => {
                self.on_local_session(session, onboarding_complete, &mut effects)
            }
            Input::Inbound(envelope) => self.on_inbound(envelope, &mut effects),
            Input::CacheTimeout => {
                if self.state == SessionState::CheckingCache {
                    tracing::debug!("no cached token before timeout");
                    self.transition(SessionState::Unauthenticated);
                }
            }
            Input::SignInRequested { popup_opened } => {
                self.on_sign_in_requested(popup_opened, &mut effects)
            }
            Input::OnboardingCompleted => self.on_onboarding_completed(&mut effects),
            Input::SignOut => {
                self.sign_out_locally(&mut effects);
                effects.push(Effect::SendToHost(Envelope::fresh(Message::SignOutRequest)));
            }
            Input::TokenRejected { reason } => {
                if self.token.is_some() {
                    tracing::info!(detail = %reason, "backend rejected frame token");
                    self.sign_out_locally(&mut effects);
                    effects.push(Effect::SendToHost(Envelope::fresh(Message::AuthInvalid {
                        reason: FailureKind::TokenRejected.as_str().to_owned(),
                    })));
                }
            }
            Input::Present(presentation) => {
                effects.push(Effect::SendToHost(Envelope::fresh(presentation.message())));
            }
        }
        effects
    }

    fn on_load(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Uninitialized {
            return;
        }
        self.transition(SessionState::CheckingCache);
        effects.push(Effect::SendToHost(Envelope::fresh(Message::AuthRequest)));
        effects.push(Effect::ArmCacheTimer(self.config.cache_wait));
    }

    fn on_local_session(
        &mut self,
        session: Option<SessionToken>,
        onboarding_complete: bool,
        effects: &mut Vec<Effect>,
    ) {
        let now = self.clock.now_ms();
        match session {
            Some(token) if token.is_usable_at(now) => {
                // The flag belongs to the stored session's visitor.
                self.local_onboarding |= onboarding_complete;
                if self.token.is_none() {
                    self.apply_token(token, false, effects);
                }
            }
            Some(_) => {
                tracing::debug!("local session expired, ignoring");
                effects.push(Effect::ClearSession);
                if onboarding_complete {
                    effects.push(Effect::ClearOnboarding);
                }
            }
            None if onboarding_complete => effects.push(Effect::ClearOnboarding),
            None => {}
        }
        self.settle_onboarding();
    }

    fn on_inbound(&mut self, envelope: Envelope, effects: &mut Vec<Effect>) {
        if !self.seen.first_sighting(envelope.id) {
            tracing::debug!(kind = envelope.kind(), id = %envelope.id, "duplicate message ignored");
            return;
        }

        let relay = provenance::should_relay_to_host(ContextKind::Frame, &envelope);
        match &envelope.message {
            Message::AuthSuccess { .. } | Message::AuthToken { .. } => {
                let Some(token) = SessionToken::from_message(&envelope.message, self.clock.now_ms())
                else {
                    return;
                };
                self.apply_token(token, true, effects);
                if relay {
                    effects.push(Effect::SendToHost(envelope.relayed()));
                }
            }
            Message::AuthInvalid { reason } => {
                tracing::info!(reason = %reason, "host reported token invalid");
                self.sign_out_locally(effects);
            }
            Message::SignOut => self.sign_out_locally(effects),
            Message::AuthCancelled => {
                self.awaiting_popup = false;
                if self.token.is_none() {
                    if self.state == SessionState::CheckingCache {
                        effects.push(Effect::CancelCacheTimer);
                    }
                    self.transition(SessionState::Unauthenticated);
                }
            }
            Message::OnboardingStatus { is_complete } => {
                self.host_onboarding = Some(*is_complete);
                if *is_complete && !self.local_onboarding {
                    self.local_onboarding = true;
                    effects.push(Effect::PersistOnboarding);
                }
                self.settle_onboarding();
            }
            Message::OnboardingComplete => {
                if !self.local_onboarding {
                    self.local_onboarding = true;
                    effects.push(Effect::PersistOnboarding);
                }
                self.settle_onboarding();
            }
            Message::AuthRequest
            | Message::SignOutRequest
            | Message::Expand
            | Message::Collapse => {}
        }
    }

    fn on_sign_in_requested(&mut self, popup_opened: bool, effects: &mut Vec<Effect>) {
        if self.token.is_some() {
            return;
        }
        if popup_opened {
            self.awaiting_popup = true;
            return;
        }
        tracing::info!(fallback = %self.config.popup_fallback, "sign-in popup blocked");
        match self.config.popup_fallback {
            PopupFallback::Confirm => effects.push(Effect::PromptAllowPopups),
            PopupFallback::Navigate => effects.push(Effect::NavigateToSignIn),
            PopupFallback::Off => {}
        }
    }

    fn on_onboarding_completed(&mut self, effects: &mut Vec<Effect>) {
        if self.local_onboarding {
            return;
        }
        self.local_onboarding = true;
        effects.push(Effect::PersistOnboarding);
        effects.push(Effect::SendToHost(Envelope::fresh(Message::OnboardingComplete)));
        self.settle_onboarding();
    }

    /// Apply a token from any source. Re-applying the held token is a no-op;
    /// a different token while already settled replaces the copy in place.
    fn apply_token(&mut self, token: SessionToken, from_peer: bool, effects: &mut Vec<Effect>) {
        if self.token.as_ref().is_some_and(|held| held.access_token == token.access_token) {
            return;
        }
        tracing::info!(
            token_fp = %fingerprint(&token.access_token),
            from_peer,
            state = %self.state,
            "applying token"
        );
        self.awaiting_popup = false;
        self.token = Some(token.clone());
        effects.push(Effect::PersistSession(token.clone()));

        if matches!(self.state, SessionState::NeedsOnboarding | SessionState::Ready) {
            return;
        }
        if self.state == SessionState::CheckingCache {
            effects.push(Effect::CancelCacheTimer);
        }
        self.transition(SessionState::Authenticated { token });
        self.settle_onboarding();
    }

    /// Move out of `Authenticated`, or out of `NeedsOnboarding` once
    /// onboarding is known to be complete.
    fn settle_onboarding(&mut self) {
        let complete = self.onboarding_complete();
        match self.state {
            SessionState::Authenticated { .. } if complete => self.transition(SessionState::Ready),
            SessionState::Authenticated { .. } => self.transition(SessionState::NeedsOnboarding),
            SessionState::NeedsOnboarding if complete => self.transition(SessionState::Ready),
            _ => {}
        }
    }

    fn sign_out_locally(&mut self, effects: &mut Vec<Effect>) {
        let was_checking = self.state == SessionState::CheckingCache;
        let had_token = self.token.take().is_some();
        self.host_onboarding = None;
        self.awaiting_popup = false;
        if self.local_onboarding {
            self.local_onboarding = false;
            effects.push(Effect::ClearOnboarding);
        }
        if was_checking {
            effects.push(Effect::CancelCacheTimer);
        }
        if had_token || self.state.is_signed_in() {
            effects.push(Effect::ClearSession);
            effects.push(Effect::ResetTryOn);
        }
        if self.state != SessionState::Uninitialized {
            self.transition(SessionState::Unauthenticated);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "session transition");
            self.state = next;
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
