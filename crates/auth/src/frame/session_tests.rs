// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::ManualClock;
use crate::token::TokenGrant;

const START_MS: u64 = 1_700_000_000_000;

fn controller_with(fallback: PopupFallback) -> SessionController {
    let config = SessionConfig { popup_fallback: fallback, ..SessionConfig::default() };
    SessionController::new(config, ManualClock::new(START_MS))
}

fn controller() -> SessionController {
    controller_with(PopupFallback::Confirm)
}

/// A controller that has loaded and found nothing locally.
fn checking() -> SessionController {
    let mut c = controller();
    c.handle(Input::Load);
    c.handle(Input::LocalSession { session: None, onboarding_complete: false });
    c
}

fn popup_success(access: &str) -> Envelope {
    let grant = TokenGrant::new(access, Some("r1".to_owned()), 3600);
    Envelope::fresh(Message::auth_success(&grant))
}

fn host_token(access: &str) -> Envelope {
    Envelope::replay(Message::AuthToken {
        access_token: access.to_owned(),
        refresh_token: None,
        expires_in_seconds: Some(3600),
    })
}

fn sent(effects: &[Effect]) -> Vec<&Envelope> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::SendToHost(env) => Some(env),
            _ => None,
        })
        .collect()
}

#[test]
fn load_requests_token_and_arms_wait() {
    let mut c = controller();
    let effects = c.handle(Input::Load);
    assert_eq!(c.state(), &SessionState::CheckingCache);
    assert_eq!(sent(&effects).len(), 1);
    assert_eq!(sent(&effects)[0].message, Message::AuthRequest);
    assert!(sent(&effects)[0].provenance_fresh);
    assert!(effects.contains(&Effect::ArmCacheTimer(Duration::from_millis(1500))));

    // A second load is ignored.
    assert!(c.handle(Input::Load).is_empty());
}

#[test]
fn timeout_without_token_is_unauthenticated() {
    let mut c = checking();
    assert!(c.handle(Input::CacheTimeout).is_empty());
    assert_eq!(c.state(), &SessionState::Unauthenticated);
}

#[test]
fn host_reply_wins_the_race() {
    let mut c = checking();
    let effects = c.handle(Input::Inbound(host_token("t1")));
    assert!(effects.contains(&Effect::CancelCacheTimer));
    assert!(matches!(effects.iter().find(|e| matches!(e, Effect::PersistSession(_))), Some(_)));
    assert_eq!(c.state(), &SessionState::NeedsOnboarding);
    assert!(sent(&effects).is_empty());

    let effects = c.handle(Input::Inbound(Envelope::replay(Message::OnboardingStatus {
        is_complete: true,
    })));
    assert_eq!(effects, vec![Effect::PersistOnboarding]);
    assert_eq!(c.state(), &SessionState::Ready);

    // The stale timer firing later changes nothing.
    assert!(c.handle(Input::CacheTimeout).is_empty());
    assert_eq!(c.state(), &SessionState::Ready);
}

#[test]
fn local_session_wins_the_race() {
    let mut c = controller();
    c.handle(Input::Load);
    let local = SessionToken {
        access_token: "t0".to_owned(),
        refresh_token: None,
        expires_at_ms: Some(START_MS + 60_000),
    };
    let effects =
        c.handle(Input::LocalSession { session: Some(local.clone()), onboarding_complete: true });
    assert!(effects.contains(&Effect::CancelCacheTimer));
    assert_eq!(c.state(), &SessionState::Ready);
    assert_eq!(c.token(), Some(&local));

    // The host answering afterwards with the same token is a no-op.
    assert!(c.handle(Input::Inbound(host_token("t0"))).is_empty());
}

#[test]
fn expired_local_session_is_discarded() {
    let mut c = controller();
    c.handle(Input::Load);
    let stale = SessionToken {
        access_token: "old".to_owned(),
        refresh_token: None,
        expires_at_ms: Some(START_MS - 1),
    };
    let effects = c.handle(Input::LocalSession { session: Some(stale), onboarding_complete: false });
    assert_eq!(effects, vec![Effect::ClearSession]);
    assert_eq!(c.state(), &SessionState::CheckingCache);
}

#[test]
fn fresh_popup_sign_in_is_relayed_once() {
    let mut c = checking();
    c.handle(Input::CacheTimeout);
    c.handle(Input::SignInRequested { popup_opened: true });
    assert!(c.awaiting_popup());

    let success = popup_success("t1");
    let effects = c.handle(Input::Inbound(success.clone()));
    let relayed = sent(&effects);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].id, success.id);
    assert!(!relayed[0].provenance_fresh);
    assert_eq!(c.state(), &SessionState::NeedsOnboarding);
    assert!(!c.awaiting_popup());

    // Same event over the second transport: nothing.
    assert!(c.handle(Input::Inbound(success)).is_empty());
}

#[test]
fn applying_same_token_twice_matches_applying_once() {
    let mut once = checking();
    once.handle(Input::Inbound(host_token("t1")));

    let mut twice = checking();
    twice.handle(Input::Inbound(host_token("t1")));
    let effects = twice.handle(Input::Inbound(host_token("t1")));

    assert!(effects.is_empty());
    assert_eq!(once.state(), twice.state());
    assert_eq!(once.token().map(|t| &t.access_token), twice.token().map(|t| &t.access_token));
}

#[test]
fn refreshed_token_replaces_copy_without_rewalking() {
    let mut c = checking();
    c.handle(Input::Inbound(host_token("t1")));
    c.handle(Input::Inbound(Envelope::replay(Message::OnboardingStatus { is_complete: true })));
    assert_eq!(c.state(), &SessionState::Ready);

    let effects = c.handle(Input::Inbound(host_token("t2")));
    assert_eq!(effects.len(), 1);
    assert!(matches!(&effects[0], Effect::PersistSession(t) if t.access_token == "t2"));
    assert_eq!(c.state(), &SessionState::Ready);
}

#[test]
fn local_onboarding_completion_is_sent_fresh_once() {
    let mut c = checking();
    c.handle(Input::Inbound(host_token("t1")));
    assert_eq!(c.state(), &SessionState::NeedsOnboarding);

    let effects = c.handle(Input::OnboardingCompleted);
    assert!(effects.contains(&Effect::PersistOnboarding));
    let out = sent(&effects);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].message, Message::OnboardingComplete);
    assert!(out[0].provenance_fresh);
    assert_eq!(c.state(), &SessionState::Ready);

    assert!(c.handle(Input::OnboardingCompleted).is_empty());
}

#[yare::parameterized(
    host_invalid = { Input::Inbound(Envelope::replay(Message::AuthInvalid { reason: "REFRESH_REJECTED".to_owned() })), false },
    host_sign_out = { Input::Inbound(Envelope::replay(Message::SignOut)), false },
    local_sign_out = { Input::SignOut, true },
    token_rejected = { Input::TokenRejected { reason: "TOKEN_REJECTED".to_owned() }, true },
)]
fn sign_out_paths_reset_session(input: Input, notifies_host: bool) {
    let mut c = checking();
    c.handle(Input::Inbound(host_token("t1")));
    let effects = c.handle(input);

    assert_eq!(c.state(), &SessionState::Unauthenticated);
    assert_eq!(c.token(), None);
    assert!(effects.contains(&Effect::ClearSession));
    assert!(effects.contains(&Effect::ResetTryOn));
    assert_eq!(sent(&effects).len(), usize::from(notifies_host));
}

#[test]
fn local_sign_out_sends_request_and_rejection_sends_invalid() {
    let mut c = checking();
    c.handle(Input::Inbound(host_token("t1")));
    let effects = c.handle(Input::SignOut);
    assert_eq!(sent(&effects)[0].message, Message::SignOutRequest);

    let mut c = checking();
    c.handle(Input::Inbound(host_token("t1")));
    let effects = c.handle(Input::TokenRejected { reason: "401 invalid_token".to_owned() });
    assert_eq!(
        sent(&effects)[0].message,
        Message::AuthInvalid { reason: "TOKEN_REJECTED".to_owned() }
    );
}

#[test]
fn sign_out_forgets_onboarding_for_next_visitor() {
    let mut c = checking();
    c.handle(Input::Inbound(popup_success("alice")));
    c.handle(Input::OnboardingCompleted);
    assert_eq!(c.state(), &SessionState::Ready);

    let effects = c.handle(Input::SignOut);
    assert!(effects.contains(&Effect::ClearOnboarding));
    assert!(!c.onboarding_complete());

    c.handle(Input::Inbound(popup_success("bob")));
    assert_eq!(c.state(), &SessionState::NeedsOnboarding);
}

#[test]
fn onboarding_flag_without_session_is_discarded() {
    let mut c = controller();
    c.handle(Input::Load);
    let effects = c.handle(Input::LocalSession { session: None, onboarding_complete: true });
    assert_eq!(effects, vec![Effect::ClearOnboarding]);
    assert!(!c.onboarding_complete());

    c.handle(Input::Inbound(host_token("t1")));
    assert_eq!(c.state(), &SessionState::NeedsOnboarding);
}

#[test]
fn cancelled_popup_resolves_wait() {
    let mut c = checking();
    c.handle(Input::SignInRequested { popup_opened: true });
    let effects = c.handle(Input::Inbound(Envelope::fresh(Message::AuthCancelled)));
    assert_eq!(effects, vec![Effect::CancelCacheTimer]);
    assert_eq!(c.state(), &SessionState::Unauthenticated);
    assert!(!c.awaiting_popup());
}

#[test]
fn cancellation_after_sign_in_is_ignored() {
    let mut c = checking();
    c.handle(Input::Inbound(popup_success("t1")));
    let before = c.state().clone();
    assert!(c.handle(Input::Inbound(Envelope::fresh(Message::AuthCancelled))).is_empty());
    assert_eq!(c.state(), &before);
}

#[yare::parameterized(
    confirm = { PopupFallback::Confirm, vec![Effect::PromptAllowPopups] },
    navigate = { PopupFallback::Navigate, vec![Effect::NavigateToSignIn] },
    off = { PopupFallback::Off, vec![] },
)]
fn blocked_popup_follows_fallback(fallback: PopupFallback, expected: Vec<Effect>) {
    let mut c = controller_with(fallback);
    c.handle(Input::Load);
    c.handle(Input::CacheTimeout);
    assert_eq!(c.handle(Input::SignInRequested { popup_opened: false }), expected);
    assert!(!c.awaiting_popup());
}

#[test]
fn presentation_hints_go_to_host() {
    let mut c = controller();
    let effects = c.handle(Input::Present(Presentation::Expanded));
    assert_eq!(sent(&effects)[0].message, Message::Expand);
}

#[test]
fn token_message_without_expiry_never_expires_locally() {
    let token = SessionToken::from_message(
        &Message::AuthToken {
            access_token: "t1".to_owned(),
            refresh_token: None,
            expires_in_seconds: None,
        },
        START_MS,
    );
    assert_eq!(token.as_ref().map(|t| t.is_usable_at(u64::MAX)), Some(true));
    assert_eq!(SessionToken::from_message(&Message::AuthRequest, START_MS), None);
}
