// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::{AuthConfig, PopupFallback};

#[derive(Debug, Parser)]
struct Cli {
    #[command(flatten)]
    config: AuthConfig,
}

fn parse(args: &[&str]) -> AuthConfig {
    Cli::parse_from(args).config
}

#[test]
fn defaults_match_documented_values() -> anyhow::Result<()> {
    let config = parse(&["tryon-auth"]);
    config.validate()?;
    assert_eq!(config.cache_wait(), Duration::from_millis(1500));
    assert_eq!(config.refresh_buffer(), Duration::from_secs(300));
    assert_eq!(config.dedupe_window, 128);
    assert_eq!(config.popup_fallback_policy()?, PopupFallback::Confirm);
    assert_eq!(config.channel, "tryon-auth");
    Ok(())
}

#[test]
fn flags_override_defaults() -> anyhow::Result<()> {
    let config = parse(&[
        "tryon-auth",
        "--cache-wait-ms",
        "3000",
        "--popup-fallback",
        "Navigate",
        "--refresh-url",
        "https://id.example/token",
        "--state-dir",
        "/tmp/tryon",
    ]);
    config.validate()?;
    assert_eq!(config.cache_wait(), Duration::from_secs(3));
    assert_eq!(config.popup_fallback_policy()?, PopupFallback::Navigate);
    assert_eq!(config.state_dir(), PathBuf::from("/tmp/tryon"));
    Ok(())
}

#[yare::parameterized(
    bad_host_origin = { &["tryon-auth", "--host-origin", "null"], "invalid host origin" },
    bad_widget_origin = { &["tryon-auth", "--widget-origin", "widget.example"], "invalid widget origin" },
    zero_wait = { &["tryon-auth", "--cache-wait-ms", "0"], "cache wait" },
    zero_dedupe = { &["tryon-auth", "--dedupe-window", "0"], "dedupe window" },
    bad_refresh_url = { &["tryon-auth", "--refresh-url", "ftp://id.example"], "refresh url" },
    bad_fallback = { &["tryon-auth", "--popup-fallback", "maybe"], "invalid popup fallback" },
    bad_log_format = { &["tryon-auth", "--log-format", "xml"], "invalid log format" },
)]
fn invalid_config(args: &[&str], expected_substr: &str) {
    let config = parse(args);
    match config.validate() {
        Ok(()) => unreachable!("expected error containing {expected_substr:?}"),
        Err(e) => assert!(e.to_string().contains(expected_substr), "{e}"),
    }
}

#[yare::parameterized(
    confirm = { "confirm", PopupFallback::Confirm },
    navigate = { "NAVIGATE", PopupFallback::Navigate },
    off = { "off", PopupFallback::Off },
)]
fn popup_fallback_parses(input: &str, expected: PopupFallback) {
    let parsed = input.parse::<PopupFallback>().ok();
    assert_eq!(parsed, Some(expected));
    assert_eq!(expected.to_string().parse::<PopupFallback>().ok(), Some(expected));
}

#[test]
fn policies_cover_expected_senders() {
    let config = AuthConfig::test();
    assert!(config.host_policy().accepts("https://widget.example"));
    assert!(!config.host_policy().accepts("https://shop.example"));
    assert!(config.frame_policy().accepts("https://shop.example"));
    assert!(config.frame_policy().accepts("https://widget.example"));
}
