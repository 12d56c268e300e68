//! Device identification and trust bookkeeping.
//!
//! A device is identified per user by the SHA-256 of its OS, browser,
//! device type and IP address, all derived from request headers.

use crate::store::{Device, DeviceType, NewDevice, Store, StoreError};
use axum::http::{header::USER_AGENT, HeaderMap};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tracing::{debug, info};
use uuid::Uuid;

use super::session::extract_client_ip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub ip_address: Option<String>,
    pub os: String,
    pub browser: String,
    pub device_type: DeviceType,
}

impl ClientInfo {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Self::new(user_agent, extract_client_ip(headers))
    }

    #[must_use]
    pub fn new(user_agent: String, ip_address: Option<String>) -> Self {
        let ua = user_agent.to_lowercase();
        Self {
            os: parse_os(&ua).to_string(),
            browser: parse_browser(&ua).to_string(),
            device_type: parse_device_type(&ua),
            user_agent,
            ip_address,
        }
    }

    #[must_use]
    pub fn device_name(&self) -> String {
        format!("{} on {}", self.browser, self.os)
    }

    /// Hex SHA-256 over the identifying attributes.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.os.as_str(),
            self.browser.as_str(),
            self.device_type.as_str(),
            self.ip_address.as_deref().unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .fold(String::with_capacity(64), |mut out, byte| {
                let _ = write!(out, "{byte:02x}");
                out
            })
    }
}

fn parse_os(ua: &str) -> &'static str {
    if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("cros") {
        "ChromeOS"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("linux") || ua.contains("x11") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn parse_browser(ua: &str) -> &'static str {
    if ua.contains("edg/") || ua.contains("edga/") || ua.contains("edgios/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox/") || ua.contains("fxios/") {
        "Firefox"
    } else if ua.contains("chrome/") || ua.contains("crios/") || ua.contains("chromium/") {
        "Chrome"
    } else if ua.contains("safari/") {
        "Safari"
    } else if ua.contains("curl/") {
        "curl"
    } else {
        "Unknown"
    }
}

fn parse_device_type(ua: &str) -> DeviceType {
    if ["bot", "crawler", "spider", "slurp"]
        .iter()
        .any(|marker| ua.contains(marker))
    {
        DeviceType::Bot
    } else if ua.contains("ipad")
        || ua.contains("tablet")
        || (ua.contains("android") && !ua.contains("mobile"))
    {
        DeviceType::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") {
        DeviceType::Mobile
    } else if ua.contains("windows")
        || ua.contains("macintosh")
        || ua.contains("x11")
        || ua.contains("cros")
        || ua.contains("linux")
    {
        DeviceType::Desktop
    } else {
        DeviceType::Unknown
    }
}

/// Find or create the device for a successful login and bump its counters.
///
/// `trust_after == 0` never trusts automatically.
///
/// # Errors
/// Returns an error if the store cannot be read or written.
pub async fn register_login(
    store: &Store,
    user_id: Uuid,
    client: &ClientInfo,
    trust_after: u32,
    now: DateTime<Utc>,
) -> Result<Device, StoreError> {
    let fingerprint = client.fingerprint();

    let existing = store
        .devices
        .find_by_fingerprint(user_id, &fingerprint)
        .await?;
    let mut device = match existing {
        Some(device) => device,
        None => {
            let created = store
                .devices
                .create(NewDevice {
                    user_id,
                    fingerprint: fingerprint.clone(),
                    device_name: client.device_name(),
                    device_type: client.device_type,
                    os: client.os.clone(),
                    browser: client.browser.clone(),
                    ip_address: client.ip_address.clone(),
                })
                .await;
            match created {
                Ok(device) => {
                    info!(device_id = %device.id, "New device registered");
                    device
                }
                // A concurrent login created it first.
                Err(StoreError::Conflict(_)) => store
                    .devices
                    .find_by_fingerprint(user_id, &fingerprint)
                    .await?
                    .ok_or(StoreError::NotFound)?,
                Err(err) => return Err(err),
            }
        }
    };

    device.login_count = device.login_count.saturating_add(1);
    device.last_used = now;
    device.ip_address.clone_from(&client.ip_address);

    let threshold = i32::try_from(trust_after).unwrap_or(i32::MAX);
    if trust_after > 0 && !device.is_trusted && device.login_count >= threshold {
        debug!(device_id = %device.id, "Device trusted after {} logins", device.login_count);
        device.is_trusted = true;
    }

    store.devices.update(&device).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::NewUser;
    use axum::http::HeaderValue;

    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Mobile/15E148 Safari/604.1";
    const CHROME_ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 14; SM-X710) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36 Edg/129.0.0.0";
    const GOOGLEBOT: &str =
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    #[test]
    fn parses_common_user_agents() {
        let info = ClientInfo::new(FIREFOX_LINUX.to_string(), None);
        assert_eq!(
            (info.os.as_str(), info.browser.as_str(), info.device_type),
            ("Linux", "Firefox", DeviceType::Desktop)
        );

        let info = ClientInfo::new(SAFARI_IPHONE.to_string(), None);
        assert_eq!(
            (info.os.as_str(), info.browser.as_str(), info.device_type),
            ("iOS", "Safari", DeviceType::Mobile)
        );

        let info = ClientInfo::new(CHROME_ANDROID_TABLET.to_string(), None);
        assert_eq!(
            (info.os.as_str(), info.browser.as_str(), info.device_type),
            ("Android", "Chrome", DeviceType::Tablet)
        );

        let info = ClientInfo::new(EDGE_WINDOWS.to_string(), None);
        assert_eq!(
            (info.os.as_str(), info.browser.as_str(), info.device_type),
            ("Windows", "Edge", DeviceType::Desktop)
        );
        assert_eq!(info.device_name(), "Edge on Windows");

        let info = ClientInfo::new(GOOGLEBOT.to_string(), None);
        assert_eq!(info.device_type, DeviceType::Bot);

        let info = ClientInfo::new(String::new(), None);
        assert_eq!(
            (info.os.as_str(), info.browser.as_str(), info.device_type),
            ("Unknown", "Unknown", DeviceType::Unknown)
        );
    }

    #[test]
    fn fingerprint_depends_on_ip_and_agent() {
        let a = ClientInfo::new(FIREFOX_LINUX.to_string(), Some("10.0.0.1".to_string()));
        let b = ClientInfo::new(FIREFOX_LINUX.to_string(), Some("10.0.0.1".to_string()));
        let c = ClientInfo::new(FIREFOX_LINUX.to_string(), Some("10.0.0.2".to_string()));
        let d = ClientInfo::new(SAFARI_IPHONE.to_string(), Some("10.0.0.1".to_string()));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn from_headers_reads_agent_and_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(FIREFOX_LINUX));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.browser, "Firefox");
    }

    async fn user(store: &Store) -> Uuid {
        store
            .users
            .create(NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn repeat_login_reuses_device() {
        let store = Store::memory();
        let user_id = user(&store).await;
        let client = ClientInfo::new(FIREFOX_LINUX.to_string(), Some("10.0.0.1".to_string()));
        let first_seen = Utc::now();

        let first = register_login(&store, user_id, &client, 0, first_seen)
            .await
            .unwrap();
        let later = first_seen + chrono::Duration::minutes(5);
        let second = register_login(&store, user_id, &client, 0, later)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.login_count, 2);
        assert_eq!(second.last_used, later);
        assert!(!second.is_trusted);
        assert_eq!(store.devices.list_for_user(user_id).await.unwrap().len(), 1);

        let other = ClientInfo::new(SAFARI_IPHONE.to_string(), Some("10.0.0.1".to_string()));
        register_login(&store, user_id, &other, 0, later)
            .await
            .unwrap();
        assert_eq!(store.devices.list_for_user(user_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn trust_after_n_logins() {
        let store = Store::memory();
        let user_id = user(&store).await;
        let client = ClientInfo::new(FIREFOX_LINUX.to_string(), None);
        let now = Utc::now();

        let device = register_login(&store, user_id, &client, 2, now).await.unwrap();
        assert!(!device.is_trusted);
        let device = register_login(&store, user_id, &client, 2, now).await.unwrap();
        assert!(device.is_trusted);
    }
}
