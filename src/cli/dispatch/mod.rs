//! Map validated CLI matches to an action.

use crate::cli::actions::{server, unlock, Action};
use crate::cli::commands::{auth, otp, ARG_DSN, ARG_PORT, ARG_REDIS_URL, ARG_USERNAME, CMD_UNLOCK};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    if let Some(sub) = matches.subcommand_matches(CMD_UNLOCK) {
        let username = sub
            .get_one::<String>(ARG_USERNAME)
            .cloned()
            .context("missing required argument: <username>")?;
        return Ok(Action::Unlock(unlock::Args { dsn, username }));
    }

    let auth_opts = auth::Options::parse(matches)?;
    let otp_opts = otp::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
        dsn,
        redis_url: matches.get_one::<String>(ARG_REDIS_URL).cloned(),
        yubico_client_id: otp_opts.client_id,
        yubico_api_key: otp_opts.api_key,
        yubico_api_url: otp_opts.api_url,
        lockout_threshold: auth_opts.lockout_threshold,
        lockout_window_seconds: auth_opts.lockout_window_seconds,
        unlock_after_seconds: auth_opts.unlock_after_seconds,
        device_trust_after: auth_opts.device_trust_after,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://guestbook@localhost:5432/guestbook";

    #[test]
    fn default_action_is_server() {
        temp_env::with_vars(
            [
                ("GUESTBOOK_DSN", Some(DSN)),
                ("GUESTBOOK_PORT", None),
                ("GUESTBOOK_REDIS_URL", None),
                ("GUESTBOOK_YUBICO_CLIENT_ID", None),
                ("GUESTBOOK_YUBICO_API_KEY", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["guestbook"]);
                match handler(&matches) {
                    Ok(Action::Server(args)) => {
                        assert_eq!(args.port, 8080);
                        assert_eq!(args.dsn, DSN);
                        assert_eq!(args.redis_url, None);
                        assert_eq!(args.yubico_client_id, None);
                    }
                    other => panic!("unexpected action: {other:?}"),
                }
            },
        );
    }

    #[test]
    fn unlock_subcommand_dispatches() {
        temp_env::with_vars([("GUESTBOOK_DSN", Some(DSN))], || {
            let matches = crate::cli::commands::new()
                .get_matches_from(vec!["guestbook", "unlock", "alice"]);
            match handler(&matches) {
                Ok(Action::Unlock(args)) => {
                    assert_eq!(args.username, "alice");
                    assert_eq!(args.dsn, DSN);
                }
                other => panic!("unexpected action: {other:?}"),
            }
        });
    }

    #[test]
    fn invalid_otp_options_fail() {
        temp_env::with_vars(
            [
                ("GUESTBOOK_DSN", Some(DSN)),
                ("GUESTBOOK_YUBICO_CLIENT_ID", Some("1")),
                ("GUESTBOOK_YUBICO_API_URL", Some("not a url")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["guestbook"]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
