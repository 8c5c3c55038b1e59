// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-side token store: the single owner of the visitor's token pair.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::error::FailureKind;
use crate::host::refresh::TokenRefresher;
use crate::host::scheduler::{RefreshScheduler, ScheduledRefresh};
use crate::storage::KeyValueStore;
use crate::token::fingerprint;

pub const ACCESS_TOKEN_KEY: &str = "tryon.access_token";
pub const REFRESH_TOKEN_KEY: &str = "tryon.refresh_token";
pub const EXPIRES_AT_KEY: &str = "tryon.expires_at";

/// The authoritative token pair. `expires_at_ms` is always computed locally
/// at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresAtEpochMs")]
    pub expires_at_ms: u64,
}

impl TokenRecord {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    /// Whole seconds of lifetime left at `now_ms`.
    pub fn remaining_secs(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms) / 1000
    }

    fn same_pair(&self, access_token: &str, refresh_token: Option<&str>) -> bool {
        self.access_token == access_token && self.refresh_token.as_deref() == refresh_token
    }
}

/// Changes the store makes on its own, outside any caller's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Refreshed(TokenRecord),
    Invalidated { reason: FailureKind },
}

#[derive(Default)]
struct Held {
    record: Option<TokenRecord>,
    /// Once set or cleared in this lifetime, memory is authoritative and the
    /// persistent store is never consulted again.
    loaded: bool,
    /// Bumped on every write or clear; an in-flight refresh whose starting
    /// version is stale discards its result.
    version: u64,
    /// Version an exchange is currently running for.
    refreshing: Option<u64>,
}

pub struct TokenStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: RefreshScheduler,
    refresher: Arc<dyn TokenRefresher>,
    held: Mutex<Held>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl TokenStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        refresh_buffer: Duration,
        refresher: Arc<dyn TokenRefresher>,
    ) -> (Arc<Self>, broadcast::Receiver<StoreEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let scheduler = RefreshScheduler::new(refresh_buffer, Arc::clone(&clock));
        let store = Arc::new(Self {
            kv,
            clock,
            scheduler,
            refresher,
            held: Mutex::new(Held::default()),
            event_tx,
        });
        (store, event_rx)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// The armed refresh, if any.
    pub fn scheduled_refresh(&self) -> Option<ScheduledRefresh> {
        self.scheduler.pending()
    }

    pub fn get(&self) -> Option<TokenRecord> {
        let mut held = self.held.lock();
        self.load_locked(&mut held);
        held.record.clone()
    }

    pub fn is_valid(&self) -> bool {
        let now = self.clock.now_ms();
        self.get().is_some_and(|r| r.is_valid_at(now))
    }

    /// Store a freshly issued pair and re-arm the refresh timer. Storing the
    /// pair already held is a no-op.
    pub fn set(
        self: &Arc<Self>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: u64,
    ) -> TokenRecord {
        let access_token = access_token.into();
        let mut held = self.held.lock();
        self.load_locked(&mut held);
        if let Some(existing) = held.record.as_ref() {
            if existing.same_pair(&access_token, refresh_token.as_deref()) {
                tracing::debug!(token_fp = %fingerprint(&access_token), "token already held");
                return existing.clone();
            }
        }
        self.write_locked(&mut held, access_token, refresh_token, expires_in_secs)
    }

    /// Forget the pair and cancel any pending refresh. Idempotent.
    pub fn clear(&self) {
        let mut held = self.held.lock();
        self.clear_locked(&mut held);
    }

    fn clear_locked(&self, held: &mut Held) {
        let had = held.record.take().is_some();
        held.loaded = true;
        held.version += 1;
        self.scheduler.disarm();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY] {
            if let Err(e) = self.kv.remove(key) {
                tracing::warn!(key, err = %e, "failed to remove persisted token field");
            }
        }
        if had {
            tracing::info!("token store cleared");
        }
    }

    /// Hydrate a persisted pair on startup and arm its refresh.
    pub fn restore(self: &Arc<Self>) -> Option<TokenRecord> {
        let mut held = self.held.lock();
        self.load_locked(&mut held);
        let record = held.record.clone()?;
        if record.refresh_token.is_some() {
            self.arm_locked(&record);
        }
        tracing::info!(
            token_fp = %fingerprint(&record.access_token),
            valid = record.is_valid_at(self.clock.now_ms()),
            "restored persisted token"
        );
        Some(record)
    }

    /// Exchange the held refresh token now. Success stores the new pair and
    /// emits [`StoreEvent::Refreshed`]; failure clears the store and emits
    /// [`StoreEvent::Invalidated`]. There is no retry.
    ///
    /// At most one exchange runs per held pair; a second call while one is in
    /// flight returns `None` without spending the refresh token again.
    pub async fn refresh_now(self: &Arc<Self>) -> Option<TokenRecord> {
        let (refresh_token, version) = {
            let mut held = self.held.lock();
            self.load_locked(&mut held);
            if held.refreshing == Some(held.version) {
                tracing::debug!("refresh already in flight");
                return None;
            }
            let refresh = held.record.as_ref().and_then(|r| r.refresh_token.clone());
            let Some(token) = refresh else {
                tracing::debug!("refresh skipped, no refresh token held");
                return None;
            };
            held.refreshing = Some(held.version);
            // The outcome re-arms or clears, so a pending timer is redundant.
            self.scheduler.disarm();
            (token, held.version)
        };

        let result = self.refresher.refresh(&refresh_token).await;

        let mut held = self.held.lock();
        if held.refreshing == Some(version) {
            held.refreshing = None;
        }
        if held.version != version {
            tracing::debug!("discarding refresh result, token changed meanwhile");
            return None;
        }

        match result {
            Ok(grant) => {
                let refresh = grant.refresh_token.or(Some(refresh_token));
                let record =
                    self.write_locked(&mut held, grant.access_token, refresh, grant.expires_in);
                drop(held);
                tracing::info!(token_fp = %fingerprint(&record.access_token), "token refreshed");
                let _ = self.event_tx.send(StoreEvent::Refreshed(record.clone()));
                Some(record)
            }
            Err(e) => {
                tracing::warn!(err = %e, "token refresh failed, signing out");
                self.clear_locked(&mut held);
                drop(held);
                let _ = self.event_tx.send(StoreEvent::Invalidated { reason: e.kind() });
                None
            }
        }
    }

    /// Refresh only if the held token has expired. A token some other path
    /// already renewed is left alone.
    pub async fn refresh_expired(self: &Arc<Self>) -> Option<TokenRecord> {
        let now = self.clock.now_ms();
        if self.get().is_some_and(|r| r.is_valid_at(now)) {
            tracing::debug!("token renewed meanwhile, refresh skipped");
            return None;
        }
        self.refresh_now().await
    }

    fn write_locked(
        self: &Arc<Self>,
        held: &mut Held,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: u64,
    ) -> TokenRecord {
        let expires_at_ms = self.clock.now_ms().saturating_add(expires_in_secs.saturating_mul(1000));
        let record = TokenRecord { access_token, refresh_token, expires_at_ms };

        held.record = Some(record.clone());
        held.loaded = true;
        held.version += 1;

        self.persist(&record);
        if record.refresh_token.is_some() {
            self.arm_locked(&record);
        } else {
            self.scheduler.disarm();
        }
        tracing::debug!(
            token_fp = %fingerprint(&record.access_token),
            expires_in_secs,
            has_refresh = record.refresh_token.is_some(),
            "token stored"
        );
        record
    }

    fn arm_locked(self: &Arc<Self>, record: &TokenRecord) {
        let weak = Arc::downgrade(self);
        self.scheduler.arm(record.expires_at_ms, move || async move {
            if let Some(store) = weak.upgrade() {
                store.refresh_now().await;
            }
        });
    }

    fn persist(&self, record: &TokenRecord) {
        let expires_at = record.expires_at_ms.to_string();
        let writes = [
            (ACCESS_TOKEN_KEY, Some(record.access_token.as_str())),
            (REFRESH_TOKEN_KEY, record.refresh_token.as_deref()),
            (EXPIRES_AT_KEY, Some(expires_at.as_str())),
        ];
        for (key, value) in writes {
            let result = match value {
                Some(value) => self.kv.set(key, value),
                None => self.kv.remove(key),
            };
            if let Err(e) = result {
                tracing::warn!(key, err = %e, "token persistence failed, keeping in-memory copy");
            }
        }
    }

    fn load_locked(&self, held: &mut Held) {
        if held.loaded {
            return;
        }
        held.loaded = true;
        held.record = self.hydrate();
    }

    /// Read the persisted pair. Any missing or unparsable field, or any
    /// storage error, yields `None`.
    fn hydrate(&self) -> Option<TokenRecord> {
        let read = |key: &str| match self.kv.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, err = %e, "token store read failed, treating as absent");
                None
            }
        };
        let access_token = read(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())?;
        let expires_at_ms = read(EXPIRES_AT_KEY)?.trim().parse::<u64>().ok()?;
        let refresh_token = read(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty());
        Some(TokenRecord { access_token, refresh_token, expires_at_ms })
    }
}

#[cfg(test)]
#[path = "token_store_tests.rs"]
mod tests;
