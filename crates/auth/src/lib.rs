// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context authentication for the embedded try-on widget: a host page
//! owns the visitor's token, widget frames request and mirror it, and a
//! sign-in popup announces new sessions.

pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod origin;
pub mod popup;
pub mod protocol;
pub mod provenance;
pub mod sim;
pub mod storage;
pub mod token;
pub mod transport;
