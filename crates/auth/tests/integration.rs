// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests across host, frames and popups in one simulated browser.

use std::sync::Arc;
use std::time::Duration;

use tryon_auth::clock::ManualClock;
use tryon_auth::config::AuthConfig;
use tryon_auth::frame::session::SessionState;
use tryon_auth::frame::Notice;
use tryon_auth::host::token_store::ACCESS_TOKEN_KEY;
use tryon_auth::sim::{run_scenario, Browser, BrowserOptions};
use tryon_auth::storage::MemoryStore;
use tryon_auth::token::TokenGrant;

const START_MS: u64 = 1_700_000_000_000;

struct Setup {
    opts: BrowserOptions,
    host_storage: Arc<MemoryStore>,
}

fn setup_with(host: MemoryStore, frame: MemoryStore) -> Setup {
    let host_storage = Arc::new(host);
    let opts = BrowserOptions {
        clock: ManualClock::new(START_MS),
        host_storage: host_storage.clone(),
        frame_storage: Arc::new(frame),
        ..BrowserOptions::new(AuthConfig::test())
    };
    Setup { opts, host_storage }
}

fn setup() -> Setup {
    setup_with(MemoryStore::new(), MemoryStore::new())
}

fn grant() -> TokenGrant {
    TokenGrant::new("access-1", Some("refresh-1".to_owned()), 3600)
}

// -- Full sign-in / sign-out ---------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sign_in_persists_arms_refresh_and_sign_out_clears() {
    let s = setup();
    let host_storage = s.host_storage.clone();
    let browser = Browser::launch(s.opts).expect("launch");

    let report = run_scenario(&browser, grant()).await.expect("scenario");

    assert_eq!(report.initial_state, "unauthenticated");
    assert!(report.popup_delivered);
    assert_eq!(report.signed_in_state, "ready");
    assert_eq!(report.refresh_delay_secs, Some(3300));
    assert!(report.host_token_cleared);
    assert!(!report.refresh_pending_after_sign_out);
    assert_eq!(report.new_frame_state, "unauthenticated");
    assert!(!host_storage.snapshot().contains_key(ACCESS_TOKEN_KEY));
}

#[tokio::test(start_paused = true)]
async fn each_context_sees_at_most_two_success_messages() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");

    let report = run_scenario(&browser, grant()).await.expect("scenario");

    assert!(report.frame_success_messages <= 2, "{report:?}");
    assert!(report.host_success_messages <= 2, "{report:?}");
    assert!(report.frame_success_messages >= 1);
    assert!(report.host_success_messages >= 1);
}

#[tokio::test(start_paused = true)]
async fn severed_opener_signs_in_over_broadcast() {
    let mut s = setup();
    s.opts.sever_opener = true;
    let browser = Browser::launch(s.opts).expect("launch");

    let report = run_scenario(&browser, grant()).await.expect("scenario");

    assert_eq!(report.signed_in_state, "ready");
    assert_eq!(report.frame_success_messages, 1);
    assert!(report.host_success_messages <= 2);
}

// -- Failure handling ----------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unavailable_storage_does_not_block_sign_in() {
    let s = setup_with(MemoryStore::unavailable(), MemoryStore::unavailable());
    let browser = Browser::launch(s.opts).expect("launch");

    let report = run_scenario(&browser, grant()).await.expect("scenario");

    assert_eq!(report.signed_in_state, "ready");
    assert_eq!(report.refresh_delay_secs, Some(3300));
    assert!(report.host_token_cleared);
}

#[tokio::test(start_paused = true)]
async fn blocked_popup_prompts_instead_of_signing_in() {
    let mut s = setup();
    s.opts.popups_blocked = true;
    let browser = Browser::launch(s.opts).expect("launch");

    let frame = browser.open_frame();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(browser.open_popup(&frame).is_none());

    let view = frame
        .wait_for(|v| v.notice.is_some())
        .await
        .expect("frame running");
    assert_eq!(view.notice, Some(Notice::AllowPopups));
    assert_eq!(view.state, SessionState::Unauthenticated);
    assert!(browser.store().get().is_none());
}

#[tokio::test(start_paused = true)]
async fn closing_popup_cancels_the_wait() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");

    let frame = browser.open_frame();
    let popup = browser.open_popup(&frame).expect("popup opens");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(frame.view().state, SessionState::CheckingCache);

    drop(popup);
    let view = frame
        .wait_for(|v| v.state == SessionState::Unauthenticated)
        .await
        .expect("frame running");
    assert!(!view.awaiting_popup);
}

// -- Multiple frames -------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn every_open_frame_picks_up_a_sign_in() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");

    let first = browser.open_frame();
    let second = browser.open_frame();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let popup = browser.open_popup(&first).expect("popup opens");
    assert!(popup.announce_success(&grant()).is_some());

    for frame in [&first, &second] {
        let view = frame
            .wait_for(|v| v.state.is_signed_in())
            .await
            .expect("frame running");
        assert_eq!(view.access_token.as_deref(), Some("access-1"));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(browser.store().get().map(|r| r.access_token), Some("access-1".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn sign_out_in_one_frame_reaches_the_others() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");

    let first = browser.open_frame();
    let second = browser.open_frame();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let popup = browser.open_popup(&first).expect("popup opens");
    popup.announce_success(&grant());
    second.wait_for(|v| v.state.is_signed_in()).await.expect("frame running");

    first.sign_out();
    let view = second
        .wait_for(|v| v.state == SessionState::Unauthenticated)
        .await
        .expect("frame running");
    assert_eq!(view.try_on_resets, 1);
    assert!(browser.store().get().is_none());
}

#[tokio::test(start_paused = true)]
async fn rejected_token_in_one_frame_signs_out_the_others() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");

    let first = browser.open_frame();
    let second = browser.open_frame();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let popup = browser.open_popup(&first).expect("popup opens");
    popup.announce_success(&grant());
    first.wait_for(|v| v.state.is_signed_in()).await.expect("frame running");
    first.onboarding_completed();
    first.wait_for(|v| v.state == SessionState::Ready).await.expect("frame running");
    second.wait_for(|v| v.state.is_signed_in()).await.expect("frame running");

    first.token_rejected("401 invalid_token");
    let view = second
        .wait_for(|v| v.state == SessionState::Unauthenticated)
        .await
        .expect("frame running");
    assert!(view.access_token.is_none());
    assert!(browser.store().get().is_none());
    assert!(!first.view().onboarding_complete);

    // The next visitor starts onboarding from scratch.
    let popup = browser.open_popup(&first).expect("popup opens");
    popup.announce_success(&TokenGrant::new("access-2", None, 3600));
    let view = first
        .wait_for(|v| v.access_token.as_deref() == Some("access-2"))
        .await
        .expect("frame running");
    assert_eq!(view.state, SessionState::NeedsOnboarding);
}

#[tokio::test(start_paused = true)]
async fn new_frame_gets_token_from_host() {
    let s = setup();
    let browser = Browser::launch(s.opts).expect("launch");
    browser.store().set("access-1", Some("refresh-1".to_owned()), 3600);

    let frame = browser.open_frame();
    let view = frame
        .wait_for(|v| v.state.is_signed_in())
        .await
        .expect("frame running");
    assert_eq!(view.access_token.as_deref(), Some("access-1"));
    assert_eq!(view.state, SessionState::NeedsOnboarding);
}
