use crate::cli::{
    actions::Action,
    commands, dispatch,
    telemetry::{self, LogOptions, Telemetry},
};
use anyhow::Result;

/// Map verbosity count to tracing level
const fn get_verbosity_level(verbosity: u8) -> Option<tracing::Level> {
    match verbosity {
        0 => None,
        1 => Some(tracing::Level::WARN),
        2 => Some(tracing::Level::INFO),
        3 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Main entry point for the CLI: returns the action and the telemetry guard.
///
/// # Errors
///
/// Returns an error if argument parsing, telemetry initialization, or action dispatch fails
pub fn start() -> Result<(Action, Telemetry)> {
    let matches = commands::new().get_matches();

    let logging = commands::logging::Options::parse(&matches);
    let telemetry = telemetry::init(&LogOptions {
        verbosity: get_verbosity_level(logging.verbosity),
        log_dir: logging.log_dir,
        json: logging.json,
    })?;

    let action = dispatch::handler(&matches)?;

    Ok((action, telemetry))
}
