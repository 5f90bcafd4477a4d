use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Bearer token plus its decoded expiry, if one could be read.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token: SecretString::from(token.into()), expires_at }
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    pub fn token_len(&self) -> usize {
        self.token.expose_secret().len()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Credential;

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential::new("eyJ.secret.sig", None);

        assert_eq!(credential.bearer_header(), "Bearer eyJ.secret.sig");
        assert!(!format!("{credential:?}").contains("secret"));
        assert_eq!(credential.token_len(), 14);
    }
}
