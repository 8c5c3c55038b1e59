// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh-token exchange against the identity backend.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::FailureKind;
use crate::token::TokenGrant;

/// Why a refresh attempt failed. Both variants are terminal for the refresh
/// token that was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The endpoint rejected the refresh token.
    Rejected(String),
    /// The endpoint could not be reached or answered garbage.
    Unavailable(String),
}

impl RefreshError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected(_) => FailureKind::RefreshRejected,
            Self::Unavailable(_) => FailureKind::RefreshUnavailable,
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "refresh rejected: {msg}"),
            Self::Unavailable(msg) => write!(f, "refresh unavailable: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

pub type RefreshFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TokenGrant, RefreshError>> + Send + 'a>>;

/// Mints a new token pair from a refresh token.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a>;
}

/// OAuth error body (`{"error": "invalid_grant", ...}`).
#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

static CRYPTO_INIT: Once = Once::new();

/// `refresh_token` grant over HTTP.
pub struct HttpRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
}

impl HttpRefresher {
    pub fn new(token_url: impl Into<String>, client_id: Option<String>) -> anyhow::Result<Self> {
        CRYPTO_INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, token_url: token_url.into(), client_id })
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        if let Some(client_id) = self.client_id.as_deref() {
            form.push(("client_id", client_id));
        }

        let resp = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<OAuthError>(&text) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error,
                },
                Err(_) => format!("status {status}"),
            };
            return Err(if status.is_server_error() {
                RefreshError::Unavailable(reason)
            } else {
                RefreshError::Rejected(reason)
            });
        }

        let grant: TokenGrant =
            resp.json().await.map_err(|e| RefreshError::Unavailable(e.to_string()))?;
        if grant.access_token.is_empty() {
            return Err(RefreshError::Unavailable("empty access token".to_owned()));
        }
        Ok(grant)
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
        Box::pin(self.exchange(refresh_token))
    }
}

/// Refresher for deployments without a refresh endpoint: every attempt fails
/// as unavailable, which signs the visitor out at expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh<'a>(&'a self, _refresh_token: &'a str) -> RefreshFuture<'a> {
        Box::pin(async { Err(RefreshError::Unavailable("no refresh endpoint".to_owned())) })
    }
}

/// Replays canned outcomes in order, then fails as unavailable. Drives the
/// in-process simulation and tests.
#[derive(Debug, Default)]
pub struct ScriptedRefresher {
    outcomes: Mutex<VecDeque<Result<TokenGrant, RefreshError>>>,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl ScriptedRefresher {
    pub fn new(outcomes: impl IntoIterator<Item = Result<TokenGrant, RefreshError>>) -> Self {
        Self { outcomes: Mutex::new(outcomes.into_iter().collect()), ..Self::default() }
    }

    pub fn push(&self, outcome: Result<TokenGrant, RefreshError>) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }

    /// Refresh tokens presented so far, oldest first.
    pub fn presented(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl TokenRefresher for ScriptedRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.seen.lock().push(refresh_token.to_owned());
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RefreshError::Unavailable("script exhausted".to_owned())));
        Box::pin(async move { outcome })
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
