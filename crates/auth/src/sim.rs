// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process browser: one host page, any number of widget frames and
//! sign-in popups sharing a broadcast bus.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::frame::session::{SessionConfig, SessionState};
use crate::frame::{Frame, FrameHandle, FrameOptions};
use crate::host::refresh::{HttpRefresher, NoRefresh, TokenRefresher};
use crate::host::token_store::TokenStore;
use crate::host::{Host, HostView};
use crate::popup::{Popup, PopupOutcome};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::token::TokenGrant;
use crate::transport::{open_window, BroadcastBus, ContextKind, Mailbox, WindowRef};

const BUS_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct BrowserOptions {
    pub config: AuthConfig,
    pub clock: Arc<dyn Clock>,
    /// Host page `localStorage`.
    pub host_storage: Arc<dyn KeyValueStore>,
    /// Widget-origin `localStorage`, shared by every frame.
    pub frame_storage: Arc<dyn KeyValueStore>,
    pub refresher: Arc<dyn TokenRefresher>,
    /// `window.open` returns nothing.
    pub popups_blocked: bool,
    /// The popup loses `window.opener` and can only broadcast.
    pub sever_opener: bool,
}

impl BrowserOptions {
    /// In-memory storage, no refresh endpoint, wall clock.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            host_storage: Arc::new(MemoryStore::new()),
            frame_storage: Arc::new(MemoryStore::new()),
            refresher: Arc::new(NoRefresh),
            popups_blocked: false,
            sever_opener: false,
        }
    }

    /// File-backed storage under the state directory and an HTTP refresher
    /// when a refresh URL is configured.
    pub fn persistent(config: AuthConfig) -> anyhow::Result<Self> {
        let dir = config.state_dir();
        let host_storage = FileStore::open(dir.join("host.json"))?;
        let frame_storage = FileStore::open(dir.join("frame.json"))?;
        let refresher: Arc<dyn TokenRefresher> = match config.refresh_url.as_deref() {
            Some(url) => Arc::new(HttpRefresher::new(url, config.client_id.clone())?),
            None => Arc::new(NoRefresh),
        };
        Ok(Self {
            host_storage: Arc::new(host_storage),
            frame_storage: Arc::new(frame_storage),
            refresher,
            ..Self::new(config)
        })
    }
}

pub struct Browser {
    config: AuthConfig,
    session: SessionConfig,
    clock: Arc<dyn Clock>,
    bus: BroadcastBus,
    host_window: WindowRef,
    store: Arc<TokenStore>,
    host_view: watch::Receiver<HostView>,
    frame_storage: Arc<dyn KeyValueStore>,
    popups_blocked: bool,
    sever_opener: bool,
    shutdown: CancellationToken,
}

impl Browser {
    /// Load the host page. Must be called within a Tokio runtime.
    pub fn launch(opts: BrowserOptions) -> anyhow::Result<Self> {
        let config = opts.config;
        config.validate()?;
        let session = SessionConfig {
            cache_wait: config.cache_wait(),
            popup_fallback: config.popup_fallback_policy()?,
            dedupe_window: config.dedupe_window,
        };

        let shutdown = CancellationToken::new();
        let bus = BroadcastBus::new(&config.channel, BUS_CAPACITY);
        let (host_window, host_inbox) = open_window(ContextKind::Host, &config.host_origin);

        let (store, events) = TokenStore::new(
            Arc::clone(&opts.host_storage),
            Arc::clone(&opts.clock),
            config.refresh_buffer(),
            opts.refresher,
        );
        if let Some(record) = store.restore() {
            tracing::info!(remaining_secs = record.remaining_secs(store.now_ms()), "restored session");
        }

        let host = Host::new(
            host_window.clone(),
            Arc::clone(&store),
            opts.host_storage,
            config.host_policy(),
            config.dedupe_window,
        );
        let host_view = host.watch();
        let mailbox = Mailbox::new(host_window.endpoint().clone(), host_inbox).with_broadcast(&bus);
        tokio::spawn(host.run(mailbox, events, shutdown.child_token()));

        tracing::info!(host = %config.host_origin, widget = %config.widget_origin, "browser launched");
        Ok(Self {
            config,
            session,
            clock: opts.clock,
            bus,
            host_window,
            store,
            host_view,
            frame_storage: opts.frame_storage,
            popups_blocked: opts.popups_blocked,
            sever_opener: opts.sever_opener,
            shutdown,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn host_view(&self) -> HostView {
        self.host_view.borrow().clone()
    }

    /// Embed a new widget frame in the host page.
    pub fn open_frame(&self) -> FrameHandle {
        let (window, inbox) = open_window(ContextKind::Frame, &self.config.widget_origin);
        Frame::spawn(FrameOptions {
            window,
            inbox,
            parent: self.host_window.clone(),
            host_origin: self.config.host_origin.clone(),
            bus: Some(self.bus.clone()),
            kv: Arc::clone(&self.frame_storage),
            clock: Arc::clone(&self.clock),
            origins: self.config.frame_policy(),
            session: self.session.clone(),
            shutdown: self.shutdown.child_token(),
        })
    }

    /// The visitor pressed sign-in in `frame`. Returns `None` when the
    /// popup was blocked.
    pub fn open_popup(&self, frame: &FrameHandle) -> Option<Popup> {
        frame.sign_in_requested(!self.popups_blocked);
        if self.popups_blocked {
            tracing::info!("popup blocked");
            return None;
        }
        let opener = (!self.sever_opener).then(|| frame.window().clone());
        Some(Popup::new(&self.config.widget_origin, opener, Some(self.bus.clone())))
    }

    /// Close every context.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Summary of [`run_scenario`].
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub initial_state: String,
    pub signed_in_state: String,
    pub popup_delivered: bool,
    pub refresh_delay_secs: Option<u64>,
    pub frame_success_messages: u32,
    pub host_success_messages: u32,
    pub host_token_cleared: bool,
    pub refresh_pending_after_sign_out: bool,
    pub new_frame_state: String,
}

/// Sign in through a popup, finish onboarding, sign out, then load a fresh
/// frame.
pub async fn run_scenario(browser: &Browser, grant: TokenGrant) -> anyhow::Result<ScenarioReport> {
    let settle_limit = browser.config().cache_wait() + Duration::from_secs(1);

    let frame = browser.open_frame();
    let initial = wait_for_state(&frame, settle_limit, |s| {
        matches!(s, SessionState::Unauthenticated) || s.is_signed_in()
    })
    .await?;

    let popup = browser
        .open_popup(&frame)
        .ok_or_else(|| anyhow::anyhow!("sign-in popup was blocked"))?;
    let outcome = popup.run(async move { Ok::<_, Infallible>(Some(grant)) }).await;
    let popup_delivered = matches!(outcome, PopupOutcome::SignedIn(d) if d.any());

    wait_for_state(&frame, settle_limit, SessionState::is_signed_in).await?;
    frame.onboarding_completed();
    let signed_in = wait_for_state(&frame, settle_limit, |s| *s == SessionState::Ready).await?;

    let store = browser.store();
    eventually(settle_limit, || store.get().is_some()).await?;
    let refresh_delay_secs = store.scheduled_refresh().map(|s| s.delay.as_secs());
    let frame_success_messages = frame.view().success_messages;
    let host_success_messages = browser.host_view().success_messages;

    frame.sign_out();
    let host_token_cleared = eventually(settle_limit, || store.get().is_none()).await.is_ok();
    let refresh_pending_after_sign_out = store.scheduled_refresh().is_some();

    let second = browser.open_frame();
    let new_frame = wait_for_state(&second, settle_limit, |s| {
        matches!(s, SessionState::Unauthenticated) || s.is_signed_in()
    })
    .await?;

    Ok(ScenarioReport {
        initial_state: initial.to_string(),
        signed_in_state: signed_in.to_string(),
        popup_delivered,
        refresh_delay_secs,
        frame_success_messages,
        host_success_messages,
        host_token_cleared,
        refresh_pending_after_sign_out,
        new_frame_state: new_frame.to_string(),
    })
}

async fn wait_for_state(
    frame: &FrameHandle,
    limit: Duration,
    mut pred: impl FnMut(&SessionState) -> bool,
) -> anyhow::Result<SessionState> {
    let view = tokio::time::timeout(limit, frame.wait_for(|v| pred(&v.state)))
        .await
        .map_err(|_| anyhow::anyhow!("frame stuck in {}", frame.view().state))?;
    view.map(|v| v.state).ok_or_else(|| anyhow::anyhow!("frame stopped"))
}

async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {limit:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}
