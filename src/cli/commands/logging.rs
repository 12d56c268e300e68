use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_DIR: &str = "log-dir";
pub const ARG_LOG_JSON: &str = "log-json";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("GUESTBOOK_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_DIR)
                .long("log-dir")
                .help("Directory for the rotated error log files")
                .env("GUESTBOOK_LOG_DIR")
                .default_value("logs/server")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_LOG_JSON)
                .long("log-json")
                .help("Emit console logs as JSON (production)")
                .env("GUESTBOOK_LOG_JSON")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity: u8,
    pub log_dir: PathBuf,
    pub json: bool,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            verbosity: matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0),
            log_dir: matches
                .get_one::<PathBuf>(ARG_LOG_DIR)
                .cloned()
                .unwrap_or_else(|| PathBuf::from("logs/server")),
            json: matches.get_flag(ARG_LOG_JSON),
        }
    }
}
