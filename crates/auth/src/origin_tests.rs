// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{normalize, OriginPolicy};

#[yare::parameterized(
    plain          = { "https://widget.example", Some("https://widget.example") },
    trailing_slash = { "https://widget.example/", Some("https://widget.example") },
    upper_case     = { "HTTPS://Widget.Example", Some("https://widget.example") },
    default_https  = { "https://widget.example:443", Some("https://widget.example") },
    default_http   = { "http://localhost:80", Some("http://localhost") },
    custom_port    = { "http://localhost:5173", Some("http://localhost:5173") },
    opaque         = { "null", None },
    empty          = { "", None },
    no_scheme      = { "widget.example", None },
    with_path      = { "https://widget.example/embed", None },
)]
fn normalize_origins(input: &str, expected: Option<&str>) {
    assert_eq!(normalize(input).as_deref(), expected);
}

#[test]
fn policy_accepts_only_listed_origins() {
    let policy = OriginPolicy::new(["https://widget.example", "https://shop.example/"]);
    assert!(policy.accepts("https://widget.example"));
    assert!(policy.accepts("https://shop.example:443"));
    assert!(!policy.accepts("https://evil.example"));
    assert!(!policy.accepts("http://widget.example"));
    assert!(!policy.accepts("null"));
}

#[test]
fn empty_policy_rejects_everything() {
    let policy = OriginPolicy::default();
    assert!(!policy.accepts("https://widget.example"));
}
