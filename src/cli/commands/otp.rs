use crate::otp::DEFAULT_API_URL;
use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_YUBICO_CLIENT_ID: &str = "yubico-client-id";
pub const ARG_YUBICO_API_KEY: &str = "yubico-api-key";
pub const ARG_YUBICO_API_URL: &str = "yubico-api-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_YUBICO_CLIENT_ID)
                .long("yubico-client-id")
                .help("YubiCloud client id; OTP verification is unavailable without it")
                .env("GUESTBOOK_YUBICO_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_YUBICO_API_KEY)
                .long("yubico-api-key")
                .help("Base64 YubiCloud API key used to sign requests and verify replies")
                .env("GUESTBOOK_YUBICO_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_YUBICO_API_URL)
                .long("yubico-api-url")
                .help("YubiCloud-compatible verification endpoint")
                .env("GUESTBOOK_YUBICO_API_URL")
                .default_value(DEFAULT_API_URL),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub client_id: Option<String>,
    pub api_key: Option<SecretString>,
    pub api_url: String,
}

impl Options {
    /// # Errors
    /// Returns an error if an API key is given without a client id or the URL is invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let client_id = matches.get_one::<String>(ARG_YUBICO_CLIENT_ID).cloned();
        let api_key = matches
            .get_one::<String>(ARG_YUBICO_API_KEY)
            .map(|key| SecretString::from(key.clone()));
        let api_url = matches
            .get_one::<String>(ARG_YUBICO_API_URL)
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        if client_id.is_none() && api_key.is_some() {
            bail!("--{ARG_YUBICO_API_KEY} requires --{ARG_YUBICO_CLIENT_ID}");
        }

        Url::parse(&api_url).with_context(|| format!("Invalid YubiCloud API URL: {api_url}"))?;

        Ok(Self {
            client_id,
            api_key,
            api_url,
        })
    }
}
