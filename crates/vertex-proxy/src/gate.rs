//! Caller authentication against the single configured API key.

use crate::error::AuthorizationError;
use secrecy::{ExposeSecret, SecretString};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug)]
pub struct AccessGate {
    api_key: SecretString,
}

impl AccessGate {
    pub fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }

    /// A missing key is treated the same as a wrong one.
    pub fn authorize(&self, supplied: Option<&str>) -> Result<(), AuthorizationError> {
        match supplied {
            Some(key) if key == self.api_key.expose_secret() => Ok(()),
            _ => Err(AuthorizationError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AccessGate {
        AccessGate::new(SecretString::from("sk-proxy".to_string()))
    }

    #[test]
    fn test_matching_key_allowed() {
        assert!(gate().authorize(Some("sk-proxy")).is_ok());
    }

    #[test]
    fn test_wrong_or_missing_key_denied() {
        assert_eq!(gate().authorize(Some("wrong")), Err(AuthorizationError));
        assert_eq!(gate().authorize(Some("")), Err(AuthorizationError));
        assert_eq!(gate().authorize(Some("sk-proxy ")), Err(AuthorizationError));
        assert_eq!(gate().authorize(None), Err(AuthorizationError));
    }
}
