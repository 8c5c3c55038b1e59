// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sender-origin validation for inbound messages.

/// Allowed sender origins for one context.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: Vec<String> =
            origins.into_iter().filter_map(|o| normalize(o.as_ref())).collect();
        allowed.sort();
        allowed.dedup();
        Self { allowed }
    }

    /// Whether a message from `origin` may be acted upon.
    pub fn accepts(&self, origin: &str) -> bool {
        match normalize(origin) {
            Some(o) => self.allowed.iter().any(|a| *a == o),
            None => false,
        }
    }
}

/// Canonical form of a serialized origin (`scheme://host[:port]`).
///
/// Returns `None` for opaque origins (`"null"`), empty strings and anything
/// without a scheme.
pub fn normalize(origin: &str) -> Option<String> {
    let trimmed = origin.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let (scheme, rest) = lower.split_once("://")?;
    if scheme.is_empty() || rest.is_empty() || rest.contains('/') {
        return None;
    }
    let default_port = match scheme {
        "https" => Some(":443"),
        "http" => Some(":80"),
        _ => None,
    };
    let host = match default_port {
        Some(port) => rest.strip_suffix(port).unwrap_or(rest),
        None => rest,
    };
    Some(format!("{scheme}://{host}"))
}

#[cfg(test)]
#[path = "origin_tests.rs"]
mod tests;
