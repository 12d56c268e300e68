use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_WINDOW_SECONDS: &str = "lockout-window-seconds";
pub const ARG_UNLOCK_AFTER_SECONDS: &str = "unlock-after-seconds";
pub const ARG_DEVICE_TRUST_AFTER: &str = "device-trust-after";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_lockout_args(command);
    with_session_args(command)
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long("lockout-threshold")
                .help("Failed logins inside the window before the account is locked")
                .env("GUESTBOOK_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_WINDOW_SECONDS)
                .long("lockout-window-seconds")
                .help("Window in seconds in which failed logins are counted together")
                .env("GUESTBOOK_LOCKOUT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_UNLOCK_AFTER_SECONDS)
                .long("unlock-after-seconds")
                .help("Expire locks after this many seconds")
                .long_help(
                    "Expire locks after this many seconds. When unset, locks persist until cleared with `guestbook unlock <username>`.",
                )
                .env("GUESTBOOK_UNLOCK_AFTER_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEVICE_TRUST_AFTER)
                .long("device-trust-after")
                .help("Trust a device automatically after this many logins (0: explicit trust only)")
                .env("GUESTBOOK_DEVICE_TRUST_AFTER")
                .default_value("0")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("GUESTBOOK_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub lockout_threshold: u32,
    pub lockout_window_seconds: i64,
    pub unlock_after_seconds: Option<i64>,
    pub device_trust_after: u32,
    pub session_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let lockout_threshold = matches
            .get_one::<u32>(ARG_LOCKOUT_THRESHOLD)
            .copied()
            .unwrap_or(5);
        let lockout_window_seconds = matches
            .get_one::<i64>(ARG_LOCKOUT_WINDOW_SECONDS)
            .copied()
            .unwrap_or(900);
        let unlock_after_seconds = matches.get_one::<i64>(ARG_UNLOCK_AFTER_SECONDS).copied();
        let session_ttl_seconds = matches
            .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(86_400);

        if lockout_threshold == 0 {
            bail!("--{ARG_LOCKOUT_THRESHOLD} must be at least 1");
        }
        if lockout_window_seconds <= 0 {
            bail!("--{ARG_LOCKOUT_WINDOW_SECONDS} must be positive");
        }
        if unlock_after_seconds.is_some_and(|seconds| seconds <= 0) {
            bail!("--{ARG_UNLOCK_AFTER_SECONDS} must be positive");
        }
        if session_ttl_seconds <= 0 {
            bail!("--{ARG_SESSION_TTL_SECONDS} must be positive");
        }

        Ok(Self {
            lockout_threshold,
            lockout_window_seconds,
            unlock_after_seconds,
            device_trust_after: matches
                .get_one::<u32>(ARG_DEVICE_TRUST_AFTER)
                .copied()
                .unwrap_or(0),
            session_ttl_seconds,
        })
    }
}
