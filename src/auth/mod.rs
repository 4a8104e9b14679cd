//! Authentication mechanisms for SMTP.
//!
//! The production relay trusts the sending network and needs no AUTH. When
//! credentials are configured, two mechanisms are supported:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//!
//! Both send the password in the clear and are only offered over TLS.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Authentication methods supported by the relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }

    /// Returns the priority for auto-selection (higher is better).
    pub fn priority(&self) -> u8 {
        match self {
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
        }
    }

    /// Parses from SMTP capability string.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for an authenticated relay.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Authentication mechanism implementation.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // Format: \0username\0password
        let response = format!(
            "\0{}\0{}",
            credentials.username,
            credentials.password.expose_secret()
        );
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(&credentials.username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(credentials: &Credentials) -> String {
        BASE64.encode(credentials.password.expose_secret())
    }

    /// Selects the method to use.
    ///
    /// A configured preference must be advertised; otherwise the highest
    /// priority advertised method wins. Nothing is selected without TLS.
    pub fn select_method(
        available: &[AuthMethod],
        preferred: Option<AuthMethod>,
        tls_enabled: bool,
    ) -> SmtpResult<AuthMethod> {
        if !tls_enabled {
            return Err(SmtpError::new(
                SmtpErrorKind::AuthMethodNotSupported,
                "Refusing to send credentials over an unencrypted connection",
            ));
        }

        if let Some(method) = preferred {
            return if available.contains(&method) {
                Ok(method)
            } else {
                Err(SmtpError::new(
                    SmtpErrorKind::AuthMethodNotSupported,
                    format!("Preferred auth method {} not supported", method),
                ))
            };
        }

        available
            .iter()
            .copied()
            .max_by_key(|m| m.priority())
            .ok_or_else(|| {
                SmtpError::new(
                    SmtpErrorKind::AuthMethodNotSupported,
                    "No compatible authentication method available",
                )
            })
    }
}
