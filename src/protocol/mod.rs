//! SMTP protocol implementation.
//!
//! Implements the RFC 5321 commands the relay session needs, reply parsing
//! with enhanced status codes, and EHLO capability parsing.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, already in angle brackets.
        address: String,
        /// SIZE parameter, sent only when the server advertises SIZE.
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address, already in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => {
                if let Some(response) = initial_response {
                    format!("AUTH {} {}", mechanism, response)
                } else {
                    format!("AUTH {}", mechanism)
                }
            }
            SmtpCommand::MailFrom { address, size } => {
                let mut cmd = format!("MAIL FROM:{}", address);
                if let Some(s) = size {
                    cmd.push_str(&format!(" SIZE={}", s));
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Formats the command for logs, hiding credentials.
    pub fn to_log_string(&self) -> String {
        match self {
            SmtpCommand::Auth { mechanism, initial_response: Some(_) } => {
                format!("AUTH {} ****", mechanism)
            }
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smtp_string())
    }
}

/// SMTP response from server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Response message lines.
    pub message: Vec<String>,
    /// Whether this is a multiline response.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a new response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Parses a response from raw lines (without line terminators).
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol("Inconsistent status codes in multiline response"));
            }

            let text = line.get(4..).unwrap_or("");
            let message = if i == 0 {
                match Self::parse_enhanced_code(text) {
                    Some((esc, rest)) => {
                        enhanced_code = Some(esc);
                        rest.trim().to_string()
                    }
                    None => text.to_string(),
                }
            } else {
                text.to_string()
            };

            messages.push(message);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Parses enhanced status code from message start.
    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        // Format: X.Y.Z rest
        let mut parts = msg.splitn(2, ' ');
        let code = EnhancedStatusCode::parse(parts.next()?)?;
        Some((code, parts.next().unwrap_or("")))
    }

    /// Returns true for the last line of a reply (`250 ...`, not `250-...`).
    pub fn is_final_line(line: &str) -> bool {
        line.as_bytes().get(3) != Some(&b'-')
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if this is a positive intermediate response (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns true if this is a permanent failure (5xx).
    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error if not successful.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.enhanced_code {
            Some(esc) => write!(f, "{} {} {}", self.code, esc, self.first_message()),
            None => write!(f, "{} {}", self.code, self.first_message()),
        }
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
    /// 8BITMIME supported.
    pub eight_bit_mime: bool,
    /// Enhanced status codes supported.
    pub enhanced_status_codes: bool,
    /// Raw capability strings.
    pub raw: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from EHLO response.
    ///
    /// The first line is the server greeting and carries no capability.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            let mut parts = line.splitn(2, ' ');
            let capability = parts.next().unwrap_or("");
            let params = parts.next().unwrap_or("");

            match capability {
                "SIZE" => {
                    caps.size = params.trim().parse().ok().filter(|s| *s > 0);
                }
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => {
                    caps.starttls = true;
                }
                "8BITMIME" => {
                    caps.eight_bit_mime = true;
                }
                "ENHANCEDSTATUSCODES" => {
                    caps.enhanced_status_codes = true;
                }
                _ => {}
            }
        }

        caps
    }

    /// Checks if a specific capability is supported.
    pub fn has_capability(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.raw.iter().any(|c| c.starts_with(&upper))
    }
}

/// Reply codes the relay session checks for.
pub mod codes {
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "<test@example.com>".to_string(),
                size: Some(1024),
            }
            .to_smtp_string(),
            "MAIL FROM:<test@example.com> SIZE=1024"
        );
        assert_eq!(
            SmtpCommand::RcptTo { address: "<ada@example.com>".to_string() }.to_string(),
            "RCPT TO:<ada@example.com>"
        );
    }

    #[test]
    fn test_auth_log_string_hides_credentials() {
        let cmd = SmtpCommand::Auth {
            mechanism: "PLAIN".to_string(),
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.to_log_string(), "AUTH PLAIN ****");
        assert_eq!(SmtpCommand::Quit.to_log_string(), "QUIT");
    }

    #[test]
    fn test_response_parse() {
        let response = SmtpResponse::parse(&lines(&["250 OK"])).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let response = SmtpResponse::parse(&lines(&[
            "250-smtp.example.com Hello",
            "250-SIZE 10485760",
            "250 STARTTLS",
        ]))
        .unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_multiline);
        assert_eq!(response.message.len(), 3);

        let bare = SmtpResponse::parse(&lines(&["354"])).unwrap();
        assert!(bare.is_intermediate());
        assert_eq!(bare.first_message(), "");
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&lines(&["OK"])).is_err());
        assert!(SmtpResponse::parse(&lines(&["2é0 OK"])).is_err());
        assert!(SmtpResponse::parse(&lines(&["250-first", "251 second"])).is_err());
    }

    #[test]
    fn test_response_with_enhanced_code() {
        let response = SmtpResponse::parse(&lines(&["550 5.1.1 User unknown"])).unwrap();
        assert_eq!(response.code, 550);
        assert!(response.is_permanent_failure());
        assert_eq!(response.first_message(), "User unknown");
        let esc = response.enhanced_code.clone().unwrap();
        assert_eq!((esc.class, esc.subject, esc.detail), (5, 1, 1));

        let err = response.to_error();
        assert_eq!(err.smtp_code(), Some(550));
        assert!(err.enhanced_code().is_some());
    }

    #[test]
    fn test_final_line_detection() {
        assert!(SmtpResponse::is_final_line("250 OK"));
        assert!(SmtpResponse::is_final_line("354"));
        assert!(!SmtpResponse::is_final_line("250-SIZE 1000"));
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: lines(&[
                "smtp.example.com",
                "SIZE 10485760",
                "AUTH PLAIN LOGIN CRAM-MD5",
                "STARTTLS",
                "8BITMIME",
                "ENHANCEDSTATUSCODES",
            ]),
            is_multiline: true,
        };

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert_eq!(caps.size, Some(10485760));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Plain));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Login));
        assert_eq!(caps.auth_mechanisms.len(), 2);
        assert!(caps.starttls);
        assert!(caps.eight_bit_mime);
        assert!(caps.enhanced_status_codes);
        assert!(caps.has_capability("starttls"));
    }

    #[test]
    fn test_greeting_line_is_not_a_capability() {
        let response = SmtpResponse::new(250, "STARTTLS.example.com greets you");
        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(!caps.starttls);
        assert!(caps.raw.is_empty());
    }
}
