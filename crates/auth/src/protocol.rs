// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-window message envelope.
//!
//! Wire format (JSON, as carried by `postMessage` / `BroadcastChannel`):
//!
//! ```json
//! {"id": "<uuid>", "kind": "auth-success",
//!  "payload": {"accessToken": "t1", "refreshToken": "r1", "expiresInSeconds": 3600},
//!  "provenanceFresh": true}
//! ```
//!
//! `id` names one real-world event. Relays keep the id and clear
//! `provenanceFresh`, which is what lets every recipient drop the second
//! copy of an event that reached it over both transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::token::TokenGrant;

/// Closed set of protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// A sign-in completed (fresh from the popup, or relayed by the frame).
    AuthSuccess {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        expires_in_seconds: u64,
    },
    /// Host's answer to `auth-request`, also pushed after a refresh.
    AuthToken {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_in_seconds: Option<u64>,
    },
    /// Frame asks the host for its cached token.
    AuthRequest,
    /// The token is no longer usable; the receiver must treat it as signed out.
    AuthInvalid { reason: String },
    /// The popup was closed without completing sign-in.
    AuthCancelled,
    SignOut,
    SignOutRequest,
    OnboardingComplete,
    OnboardingStatus { is_complete: bool },
    Expand,
    Collapse,
}

impl Message {
    pub fn auth_success(grant: &TokenGrant) -> Self {
        Self::AuthSuccess {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_in_seconds: grant.expires_in,
        }
    }

    /// Wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthSuccess { .. } => "auth-success",
            Self::AuthToken { .. } => "auth-token",
            Self::AuthRequest => "auth-request",
            Self::AuthInvalid { .. } => "auth-invalid",
            Self::AuthCancelled => "auth-cancelled",
            Self::SignOut => "sign-out",
            Self::SignOutRequest => "sign-out-request",
            Self::OnboardingComplete => "onboarding-complete",
            Self::OnboardingStatus { .. } => "onboarding-status",
            Self::Expand => "expand",
            Self::Collapse => "collapse",
        }
    }

    /// Whether this message announces a usable token.
    pub fn is_success_class(&self) -> bool {
        matches!(self, Self::AuthSuccess { .. } | Self::AuthToken { .. })
    }
}

/// Presentation hint carried on the same envelope as the auth protocol.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    #[default]
    Collapsed,
    Expanded,
}

impl Presentation {
    pub fn message(self) -> Message {
        match self {
            Self::Collapsed => Message::Collapse,
            Self::Expanded => Message::Expand,
        }
    }
}

/// One message plus its event identity and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireEnvelope")]
pub struct Envelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub message: Message,
    /// True only on the first emission of a newly created event.
    pub provenance_fresh: bool,
}

impl Envelope {
    /// A new event originating in the calling context.
    pub fn fresh(message: Message) -> Self {
        Self { id: Uuid::new_v4(), message, provenance_fresh: true }
    }

    /// A new message that replays state already known elsewhere
    /// (replies, pushes of cached state).
    pub fn replay(message: Message) -> Self {
        Self { id: Uuid::new_v4(), message, provenance_fresh: false }
    }

    /// The same event, forwarded by a context that did not originate it.
    pub fn relayed(&self) -> Self {
        Self { id: self.id, message: self.message.clone(), provenance_fresh: false }
    }

    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    pub fn encode(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Decode an inbound payload. Malformed input yields `None`.
    pub fn decode(data: &Value) -> Option<Self> {
        match serde_json::from_value::<Self>(data.clone()) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::debug!(err = %e, "dropping malformed message");
                None
            }
        }
    }
}

/// Lenient wire shape: `id` and `payload` may be absent, and an empty
/// payload object is accepted for payload-less kinds.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    id: Option<Uuid>,
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    provenance_fresh: bool,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = serde_json::Error;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let mut tagged = serde_json::Map::new();
        tagged.insert("kind".to_owned(), Value::String(wire.kind));
        match wire.payload {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) if map.is_empty() => {}
            Some(payload) => {
                tagged.insert("payload".to_owned(), payload);
            }
        }
        let message: Message = serde_json::from_value(Value::Object(tagged))?;
        Ok(Self {
            id: wire.id.unwrap_or_else(Uuid::new_v4),
            message,
            provenance_fresh: wire.provenance_fresh,
        })
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
