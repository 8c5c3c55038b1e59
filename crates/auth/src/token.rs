// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token pair types shared by every context.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A freshly issued token pair, as produced by sign-in or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default, alias = "expiresIn", alias = "expiresInSeconds")]
    pub expires_in: u64,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>, expires_in: u64) -> Self {
        Self { access_token: access_token.into(), refresh_token, expires_in }
    }
}

/// Short, stable identifier for a token that is safe to log.
///
/// First 8 hex chars of the SHA-256 digest.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
