//! # Guestbook
//!
//! Backend for a small guestbook site: account registration, login with
//! lockout after repeated failures, per-user device tracking, optional
//! YubiKey OTP as a second factor, and a registration page that checks
//! password strength in the browser.
//!
//! ## Storage
//!
//! Users, devices, failed login attempts and sessions live in `PostgreSQL`
//! behind one repository trait per entity (see [`store`]). The schema is
//! created by the embedded migrations at startup. An in-memory store backs
//! the tests.
//!
//! ## Logging
//!
//! `tracing` everywhere. The console follows `-v`/`GUESTBOOK_LOG_LEVEL`;
//! `ERROR` events are also written to `logs/server/error-<date>.log`,
//! rotated daily or at 20 MB, gzip-archived and kept 14 days
//! ([`logfile`]).

pub mod api;
pub mod cache;
pub mod cli;
pub mod logfile;
pub mod otp;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
