//! Authentication building blocks shared by the handlers.
//!
//! ## Lockout
//!
//! Failed logins are counted per account, or per client (IP + user agent)
//! for unknown usernames. Reaching the threshold inside the window locks
//! the row; locks either expire after `--unlock-after-seconds` or stay
//! until `guestbook unlock <username>` clears them.
//!
//! ## Devices
//!
//! Every successful login finds or creates the device row for the request
//! fingerprint. Devices become trusted after `--device-trust-after` logins
//! (when non-zero) or explicitly through `POST /me/devices/{id}/trust`.

pub mod device;
pub mod lockout;
pub mod password;
pub mod principal;
pub mod session;
mod state;

pub use state::{AuthConfig, AuthState};
