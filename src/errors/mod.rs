//! Error types for the inquiry relay.
//!
//! Three families of failure exist:
//! - [`RequestError`] for inbound data that cannot become an inquiry record,
//! - [`SmtpError`] for protocol-level failures talking to the relay,
//! - [`DeliveryError`], an [`SmtpError`] tagged with the session stage it
//!   happened in and, for envelope rejections, the address concerned.

use std::fmt;
use thiserror::Error;

/// Result type for SMTP operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// SMTP error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Connection errors
    /// Connection was refused.
    ConnectionRefused,
    /// Connection was reset or closed by the server.
    ConnectionReset,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS not offered by the server while required.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials are invalid.
    CredentialsInvalid,
    /// Authentication method not supported.
    AuthMethodNotSupported,
    /// Authentication is required.
    AuthenticationRequired,

    // Protocol errors
    /// Invalid response from server.
    InvalidResponse,
    /// Unexpected response code.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,

    // Message errors
    /// Invalid sender address.
    InvalidFromAddress,
    /// Invalid recipient address.
    InvalidRecipientAddress,
    /// Message exceeds size limit.
    MessageTooLarge,
    /// Invalid header format.
    InvalidHeader,

    // Timeout errors
    /// Connect timeout.
    ConnectTimeout,
    /// Read timeout.
    ReadTimeout,
    /// Write timeout.
    WriteTimeout,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

impl SmtpErrorKind {
    /// Returns true for failures the relay reported as temporary.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::ConnectTimeout
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
                | SmtpErrorKind::ServerShutdown
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SmtpErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::InvalidFromAddress => write!(f, "Invalid sender address"),
            SmtpErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SmtpErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// SMTP error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP status code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP status code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if the relay (or the network) reported a temporary failure.
    pub fn is_transient(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return (400..500).contains(&code);
        }
        self.kind.is_transient()
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates a message error.
    pub fn message_error(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error from an SMTP response.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=503 => SmtpErrorKind::InvalidResponse,
            530 => SmtpErrorKind::AuthenticationRequired,
            535 => SmtpErrorKind::CredentialsInvalid,
            550 => SmtpErrorKind::InvalidRecipientAddress,
            552 => SmtpErrorKind::MessageTooLarge,
            553 => SmtpErrorKind::InvalidFromAddress,
            400..=599 => SmtpErrorKind::UnexpectedResponse,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

/// The part of an SMTP session a delivery failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStage {
    /// TCP connect and server greeting.
    Connect,
    /// EHLO/HELO, STARTTLS negotiation and AUTH.
    Handshake,
    /// MAIL FROM / RCPT TO.
    Envelope,
    /// DATA and the message transcript.
    Transcript,
    /// QUIT, after the message was accepted.
    SessionClose,
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryStage::Connect => "connect",
            DeliveryStage::Handshake => "handshake",
            DeliveryStage::Envelope => "envelope",
            DeliveryStage::Transcript => "transcript",
            DeliveryStage::SessionClose => "session close",
        };
        f.write_str(name)
    }
}

/// A failed send, classified by the stage it failed in.
#[derive(Error, Debug)]
pub struct DeliveryError {
    stage: DeliveryStage,
    address: Option<String>,
    #[source]
    source: SmtpError,
}

impl DeliveryError {
    /// Creates a delivery error for a stage.
    pub fn new(stage: DeliveryStage, source: SmtpError) -> Self {
        Self {
            stage,
            address: None,
            source,
        }
    }

    /// Creates an envelope rejection carrying the rejected address.
    pub fn rejected(address: impl Into<String>, source: SmtpError) -> Self {
        Self {
            stage: DeliveryStage::Envelope,
            address: Some(address.into()),
            source,
        }
    }

    /// Returns the stage the send failed in.
    pub fn stage(&self) -> DeliveryStage {
        self.stage
    }

    /// Returns the rejected address for envelope failures.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Returns the underlying SMTP error.
    pub fn smtp_error(&self) -> &SmtpError {
        &self.source
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.stage)?;
        if let Some(address) = &self.address {
            write!(f, " for <{}>", address)?;
        }
        write!(f, ": {}", self.source)
    }
}

/// Inbound data that cannot be turned into an inquiry record.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The body is not a decodable inquiry document.
    #[error("Invalid request body")]
    InvalidBody(#[source] serde_json::Error),
    /// First name, last name or email is missing or blank.
    #[error("Missing required fields")]
    MissingFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhanced_status_code_parse() {
        let code = EnhancedStatusCode::parse("5.1.1").unwrap();
        assert_eq!(code.class, 5);
        assert_eq!(code.subject, 1);
        assert_eq!(code.detail, 1);

        assert!(EnhancedStatusCode::parse("Hello").is_none());
        assert!(EnhancedStatusCode::parse("1.2.3").is_none());
        assert!(EnhancedStatusCode::parse("5.1.1.1").is_none());
    }

    #[test]
    fn test_smtp_error_from_response() {
        let err = SmtpError::from_smtp_response(535, "Authentication failed");
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
        assert_eq!(err.smtp_code(), Some(535));
        assert!(!err.is_transient());

        let err = SmtpError::from_smtp_response(421, "Service unavailable");
        assert_eq!(err.kind(), SmtpErrorKind::ServerShutdown);
        assert!(err.is_transient());

        let err = SmtpError::from_smtp_response(554, "Transaction failed");
        assert_eq!(err.kind(), SmtpErrorKind::UnexpectedResponse);
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::rejected(
            "nobody@example.com",
            SmtpError::from_smtp_response(550, "User unknown"),
        );
        assert_eq!(err.stage(), DeliveryStage::Envelope);
        assert_eq!(err.address(), Some("nobody@example.com"));
        let text = err.to_string();
        assert!(text.starts_with("envelope failed for <nobody@example.com>"));
        assert!(text.contains("SMTP 550"));

        let err = DeliveryError::new(DeliveryStage::SessionClose, SmtpError::protocol("closed"));
        assert!(err.to_string().starts_with("session close failed: "));
        assert!(err.address().is_none());
    }

    #[test]
    fn test_request_error_messages() {
        assert_eq!(RequestError::MissingFields.to_string(), "Missing required fields");
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(RequestError::InvalidBody(decode).to_string(), "Invalid request body");
    }
}
