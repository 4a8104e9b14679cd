//! MIME encoding for composed messages.
//!
//! Renders an [`EmailMessage`] as an RFC 5322 message with a
//! `multipart/alternative` body:
//! - Header encoding (RFC 2047) for non-ASCII subject and display name
//! - Quoted-printable encoding of both parts
//! - DATA preparation (dot-stuffing and terminator)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::types::{Address, EmailMessage};

/// Boundary used between the plain and HTML parts.
pub const BOUNDARY: &str = "GatherBoundary42";

/// Bytes of UTF-8 per encoded word; 39 bytes become 52 base64 characters,
/// keeping every word and the first header line under 76 characters.
const ENCODED_WORD_CHUNK: usize = 39;

/// Transfer encoding of both body parts.
const TRANSFER_ENCODING: &str = "quoted-printable";

/// MIME encoder for outgoing messages.
#[derive(Debug, Clone)]
pub struct MimeEncoder {
    /// Sender used for the `From` header.
    from: Address,
}

impl MimeEncoder {
    /// Creates a new encoder for the given sender.
    pub fn new(from: Address) -> Self {
        Self { from }
    }

    /// Returns the sender.
    pub fn from_address(&self) -> &Address {
        &self.from
    }

    /// Encodes a message to RFC 5322 format.
    ///
    /// Header values containing CR or LF are rejected.
    pub fn encode(&self, message: &EmailMessage) -> SmtpResult<Vec<u8>> {
        let mut output = Vec::with_capacity(message.text.len() + message.html.len() * 2 + 512);

        self.write_encoded_header(&mut output, "From", &self.format_from()?)?;
        self.write_header(&mut output, "To", &message.to)?;
        self.write_encoded_header(&mut output, "Subject", &Self::encode_header(&message.subject)?)?;
        self.write_header(&mut output, "Reply-To", &message.reply_to)?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;

        let boundary = Self::select_boundary(message);
        self.write_header(
            &mut output,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{}\"", boundary),
        )?;
        output.extend_from_slice(b"\r\n");

        self.write_part(&mut output, &boundary, &mime::TEXT_PLAIN_UTF_8, &message.text)?;
        self.write_part(&mut output, &boundary, &mime::TEXT_HTML_UTF_8, &message.html)?;
        output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Ok(output)
    }

    /// The fixed boundary, unless a body already contains it.
    fn select_boundary(message: &EmailMessage) -> String {
        if message.text.contains(BOUNDARY) || message.html.contains(BOUNDARY) {
            Self::generate_boundary()
        } else {
            BOUNDARY.to_string()
        }
    }

    /// Generates a unique boundary.
    fn generate_boundary() -> String {
        format!("----=_Part_{}", Uuid::new_v4().simple())
    }

    fn format_from(&self) -> SmtpResult<String> {
        Self::check_header_value("From", &self.from.email)?;
        match self.from.name() {
            Some(name) if !name.is_empty() => {
                Self::check_header_value("From", name)?;
                let display = if !Self::is_plain_ascii(name) {
                    Self::encode_words(name)
                } else if name.contains(|c: char| !c.is_ascii_alphanumeric() && c != ' ') {
                    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
                } else {
                    name.to_string()
                };
                Ok(format!("{} <{}>", display, self.from.email))
            }
            _ => Ok(self.from.email.clone()),
        }
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
        Self::check_header_value(name, value)?;
        self.write_encoded_header(output, name, value)
    }

    /// Writes a header whose value was already checked and, when it holds
    /// encoded words, already folded.
    fn write_encoded_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
        if name.chars().any(|c| c.is_control() || c == ':') {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        if value.contains("\r\n ") {
            output.extend_from_slice(header.as_bytes());
        } else {
            output.extend_from_slice(Self::fold_header(&header).as_bytes());
        }
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn check_header_value(name: &str, value: &str) -> SmtpResult<()> {
        if value.contains(['\r', '\n']) {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidHeader,
                format!("Header {} contains a line break", name),
            ));
        }
        Ok(())
    }

    /// Folds a header line at 78 characters.
    fn fold_header(header: &str) -> String {
        if header.len() <= 78 {
            return header.to_string();
        }

        let mut result = String::new();
        let mut current_line = String::new();

        for word in header.split(' ') {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + 1 + word.len() <= 76 {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push_str(&current_line);
                result.push_str("\r\n ");
                current_line = word.to_string();
            }
        }

        result.push_str(&current_line);
        result
    }

    fn is_plain_ascii(value: &str) -> bool {
        value.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
    }

    /// Encodes a header value using RFC 2047 when it is not plain ASCII.
    fn encode_header(value: &str) -> SmtpResult<String> {
        Self::check_header_value("Subject", value)?;
        if Self::is_plain_ascii(value) {
            Ok(value.to_string())
        } else {
            Ok(Self::encode_words(value))
        }
    }

    /// Splits on character boundaries into B-encoded words joined by folds.
    fn encode_words(value: &str) -> String {
        let mut words = Vec::new();
        let mut start = 0;

        while start < value.len() {
            let mut end = (start + ENCODED_WORD_CHUNK).min(value.len());
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&value[start..end])));
            start = end;
        }

        words.join("\r\n ")
    }

    fn write_part(
        &self,
        output: &mut Vec<u8>,
        boundary: &str,
        content_type: &mime::Mime,
        body: &str,
    ) -> SmtpResult<()> {
        output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        self.write_header(output, "Content-Type", content_type.as_ref())?;
        self.write_header(output, "Content-Transfer-Encoding", TRANSFER_ENCODING)?;
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&Self::encode_quoted_printable(body));
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Encodes text using quoted-printable; all line endings become CRLF.
    fn encode_quoted_printable(text: &str) -> Vec<u8> {
        quoted_printable::encode(normalize_line_endings(text, "\r\n").as_bytes())
    }

    /// Prepares the DATA content with dot-stuffing.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                // Dot-stuffing: double dots at start of line
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        // Ensure CRLF at end
        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        // End with <CRLF>.<CRLF>
        output.extend_from_slice(b".\r\n");

        output
    }
}

/// Rewrites `\r\n`, `\r` and `\n` as `newline`.
pub fn normalize_line_endings(text: &str, newline: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', newline)
}
