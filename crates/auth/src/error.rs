// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by every context.
///
/// None of these cross a context boundary as an error. They travel as the
/// `reason` of an `auth-invalid` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The refresh endpoint rejected the refresh token.
    RefreshRejected,
    /// The refresh endpoint could not be reached or answered garbage.
    RefreshUnavailable,
    /// The widget saw its access token rejected by the backend.
    TokenRejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshRejected => "REFRESH_REJECTED",
            Self::RefreshUnavailable => "REFRESH_UNAVAILABLE",
            Self::TokenRejected => "TOKEN_REJECTED",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
