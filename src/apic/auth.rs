//! APIC Authentication
//!
//! Login credentials and the session token issued by `aaaLogin`/`aaaRefresh`.

use std::fmt;
use std::time::{Duration, Instant};

/// APIC session tokens expire after 600s by default; refresh well before that
pub const TOKEN_TTL: Duration = Duration::from_secs(480);

/// Username/password pair for one controller
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

// Security: never print the password, not even in debug logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Token currently held by a client
#[derive(Clone)]
pub struct SessionToken {
    pub token: String,
    /// When the controller issued (or last refreshed) this token
    pub issued_at: Instant,
}

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self {
            token,
            issued_at: Instant::now(),
        }
    }

    /// Check if this token can still be used without a refresh
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.issued_at.elapsed() < ttl
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"********")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_fresh() {
        let token = SessionToken::new("abc".to_string());
        assert!(token.is_fresh(TOKEN_TTL));
    }

    #[test]
    fn test_zero_ttl_goes_stale() {
        let token = SessionToken {
            token: "abc".to_string(),
            issued_at: Instant::now() - Duration::from_millis(5),
        };
        assert!(!token.is_fresh(Duration::ZERO));
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = Credentials::new("admin", "s3cret");
        let out = format!("{:?}", creds);
        assert!(out.contains("admin"));
        assert!(!out.contains("s3cret"));
    }
}
