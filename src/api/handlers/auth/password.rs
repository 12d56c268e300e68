//! Password hashing and registration input rules.
//!
//! [`strength_score`] is mirrored by the meter in `assets/register.html`;
//! keep both in sync.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MIN_STRENGTH_SCORE: u8 = 2;

fn argon2id() -> Argon2<'static> {
    Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
}

/// Hash a password into a PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2id()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string())
}

/// `false` for a wrong password or an unparseable stored hash.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        argon2id()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Score from 0 (very weak) to 4 (strong).
#[must_use]
pub fn strength_score(password: &str) -> u8 {
    let length = password.chars().count();
    let mut score = 0u8;

    if length >= MIN_PASSWORD_LEN {
        score += 1;
    }
    if length >= 12 {
        score += 1;
    }
    if password.chars().any(char::is_lowercase) && password.chars().any(char::is_uppercase) {
        score += 1;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    if password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        score += 1;
    }

    score.min(4)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").is_ok_and(|regex| regex.is_match(username))
}

/// Reason the password is rejected, if any.
pub fn password_problem(password: &str) -> Option<&'static str> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Some("Password must be at least 8 characters");
    }
    if length > MAX_PASSWORD_LEN {
        return Some("Password must be at most 128 characters");
    }
    if strength_score(password) < MIN_STRENGTH_SCORE {
        return Some("Password is too weak");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("Correct-Horse-9");
        assert!(hash.as_ref().is_ok_and(|hash| hash.starts_with("$argon2id$")));
        let hash = hash.unwrap_or_default();
        assert!(verify_password("Correct-Horse-9", &hash));
        assert!(!verify_password("correct-horse-9", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("whatever", "not-a-phc-string"));
    }

    #[test]
    fn strength_score_levels() {
        assert_eq!(strength_score(""), 0);
        assert_eq!(strength_score("abc"), 0);
        assert_eq!(strength_score("abcdefgh"), 1);
        assert_eq!(strength_score("abcdefg1"), 2);
        assert_eq!(strength_score("Abcdefg1"), 3);
        assert_eq!(strength_score("Abcdefgh1!xyz"), 4);
    }

    #[test]
    fn password_rules() {
        assert_eq!(
            password_problem("Ab1!"),
            Some("Password must be at least 8 characters")
        );
        assert_eq!(password_problem("abcdefgh"), Some("Password is too weak"));
        assert_eq!(
            password_problem(&"aB3!".repeat(33)),
            Some("Password must be at most 128 characters")
        );
        assert_eq!(password_problem("abcdefg1"), None);
    }

    #[test]
    fn username_rules() {
        assert!(valid_username("alice"));
        assert!(valid_username("a.b-c_d"));
        assert!(!valid_username("ab"));
        assert!(!valid_username(&"a".repeat(33)));
        assert!(!valid_username("al ice"));
        assert!(!valid_username("alice@home"));
    }

    #[test]
    fn email_rules() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }
}
