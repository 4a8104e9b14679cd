//! Transport layer for SMTP connections.
//!
//! A TCP connection to the relay that can be upgraded in place to TLS after
//! STARTTLS. Every read and write is bounded by the command timeout; the
//! connect and the TLS handshake are bounded by the connect timeout.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{RelayConfig, TlsConfig};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};

/// Longest reply line accepted, CRLF included.
const MAX_REPLY_LINE_LENGTH: usize = 1000;
/// Most lines accepted in one multiline reply.
const MAX_REPLY_LINES: usize = 100;

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw data (message content, AUTH continuation lines).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Upgrades the connection to TLS, verifying the certificate against
    /// `server_name`.
    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Shuts the connection down without sending anything further.
    async fn close(&mut self) -> SmtpResult<()>;

    /// Returns the server capabilities.
    fn capabilities(&self) -> Option<&EsmtpCapabilities>;

    /// Sets the server capabilities.
    fn set_capabilities(&mut self, caps: EsmtpCapabilities);
}

trait Stream: AsyncBufRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(feature = "native-tls")]
    NativeTls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
    /// The socket was handed to a TLS handshake that did not complete.
    Detached,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream.
    stream: TransportStream,
    /// Connect and TLS handshake timeout.
    connect_timeout: Duration,
    /// Command timeout.
    command_timeout: Duration,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Server host.
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("detached", &matches!(self.stream, TransportStream::Detached))
            .finish()
    }
}

impl TcpTransport {
    /// Connects to the relay and reads its greeting.
    pub async fn connect(config: &RelayConfig) -> SmtpResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::ConnectTimeout,
                    format!("Connect to {} timed out", address),
                )
            })?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            capabilities: None,
            tls_enabled: false,
            host: config.host.clone(),
        };

        let greeting = transport.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.to_error());
        }

        Ok(transport)
    }

    /// Maps IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => SmtpError::new(
                SmtpErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            )
            .with_cause(error),
            io::ErrorKind::TimedOut => {
                SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "Connect timed out")
            }
            io::ErrorKind::ConnectionReset => {
                SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection reset by server")
            }
            _ => SmtpError::connection(format!("Connection error: {}", error)).with_cause(error),
        }
    }

    fn stream_mut(&mut self) -> SmtpResult<&mut dyn Stream> {
        match &mut self.stream {
            TransportStream::Plain(stream) => Ok(stream),
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Ok(stream),
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(stream) => Ok(stream),
            TransportStream::Detached => Err(SmtpError::new(
                SmtpErrorKind::ConnectionReset,
                "Connection is closed",
            )),
        }
    }

    /// Takes the plain socket out for a TLS handshake.
    ///
    /// Bytes already buffered after the STARTTLS reply would be read as if
    /// they had arrived over TLS, so they abort the upgrade.
    fn take_plain_stream(&mut self) -> SmtpResult<TcpStream> {
        match std::mem::replace(&mut self.stream, TransportStream::Detached) {
            TransportStream::Plain(reader) if reader.buffer().is_empty() => Ok(reader.into_inner()),
            TransportStream::Plain(_) => Err(SmtpError::tls(
                "Unexpected data received before TLS negotiation",
            )),
            other => {
                self.stream = other;
                Err(SmtpError::tls("Already using TLS"))
            }
        }
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner<R: AsyncBufRead + Unpin + ?Sized>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            if lines.len() >= MAX_REPLY_LINES {
                return Err(SmtpError::protocol(format!(
                    "Reply exceeds {} lines",
                    MAX_REPLY_LINES
                )));
            }

            let mut line = String::new();
            let mut limited = (&mut *reader).take(MAX_REPLY_LINE_LENGTH as u64 + 1);

            let read = timeout(timeout_duration, limited.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| io_error("Read error", e))?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }
            if read > MAX_REPLY_LINE_LENGTH {
                return Err(SmtpError::protocol(format!(
                    "Reply line exceeds {} bytes",
                    MAX_REPLY_LINE_LENGTH
                )));
            }

            let line = line.trim_end().to_string();
            let is_final = SmtpResponse::is_final_line(&line);
            lines.push(line);

            if is_final {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin + ?Sized>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> SmtpResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| io_error("Write error", e))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(|e| io_error("Flush error", e))?;

        Ok(())
    }

    #[cfg(feature = "rustls-tls")]
    fn rustls_connector(config: &TlsConfig) -> SmtpResult<tokio_rustls::TlsConnector> {
        use std::sync::Arc;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &config.ca_cert_path {
            for cert in load_pem_certificates(path)? {
                root_store
                    .add(rustls::pki_types::CertificateDer::from(cert))
                    .map_err(|e| SmtpError::tls(format!("Invalid CA certificate: {}", e)))?;
            }
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(tokio_rustls::TlsConnector::from(Arc::new(tls_config)))
    }

    #[cfg(feature = "native-tls")]
    fn native_connector(config: &TlsConfig) -> SmtpResult<tokio_native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();

        if let Some(path) = &config.ca_cert_path {
            for der in load_pem_certificates(path)? {
                let cert = native_tls::Certificate::from_der(&der)
                    .map_err(|e| SmtpError::tls(format!("Invalid CA certificate: {}", e)))?;
                builder.add_root_certificate(cert);
            }
        }

        let connector = builder
            .build()
            .map_err(|e| SmtpError::tls(format!("Failed to build TLS connector: {}", e)))?;

        Ok(tokio_native_tls::TlsConnector::from(connector))
    }
}

/// Reads DER certificates from a PEM bundle.
#[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
fn load_pem_certificates(path: &std::path::Path) -> SmtpResult<Vec<Vec<u8>>> {
    let file = std::fs::File::open(path).map_err(|e| {
        SmtpError::configuration(format!("Cannot open CA file {}: {}", path.display(), e))
    })?;
    let mut reader = std::io::BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SmtpError::configuration(format!("Invalid CA file {}: {}", path.display(), e)))
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let cmd_str = format!("{}\r\n", command.to_smtp_string());

        tracing::debug!(command = %command.to_log_string(), "Sending SMTP command");

        let command_timeout = self.command_timeout;
        Self::write_all(self.stream_mut()?, cmd_str.as_bytes(), command_timeout).await?;

        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        let command_timeout = self.command_timeout;
        Self::write_all(self.stream_mut()?, data, command_timeout).await
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let command_timeout = self.command_timeout;
        let response = Self::read_response_inner(self.stream_mut()?, command_timeout).await?;

        tracing::debug!(code = response.code, reply = %response.first_message(), "Received SMTP response");

        Ok(response)
    }

    #[allow(unused_variables)]
    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;

            let connector = Self::rustls_connector(config)?;
            let name = ServerName::try_from(server_name.to_string())
                .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", server_name)))?;

            let tcp_stream = self.take_plain_stream()?;

            let tls_stream = timeout(self.connect_timeout, connector.connect(name, tcp_stream))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out"))?
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))?;

            self.stream = TransportStream::Tls(BufReader::new(tls_stream));
            self.tls_enabled = true;

            tracing::debug!(server_name, "TLS established");
            Ok(())
        }

        #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
        {
            let connector = Self::native_connector(config)?;
            let tcp_stream = self.take_plain_stream()?;

            let tls_stream = timeout(self.connect_timeout, connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out"))?
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))?;

            self.stream = TransportStream::NativeTls(BufReader::new(tls_stream));
            self.tls_enabled = true;

            tracing::debug!(server_name, "TLS established");
            Ok(())
        }

        #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
        {
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if let Ok(stream) = self.stream_mut() {
            let _ = stream.shutdown().await;
        }
        self.stream = TransportStream::Detached;
        Ok(())
    }

    fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    fn set_capabilities(&mut self, caps: EsmtpCapabilities) {
        self.capabilities = Some(caps);
    }
}

/// Maps a socket error; anything but undecodable bytes means the connection is gone.
fn io_error(context: &str, e: io::Error) -> SmtpError {
    let kind = match e.kind() {
        io::ErrorKind::InvalidData => SmtpErrorKind::InvalidResponse,
        _ => SmtpErrorKind::ConnectionReset,
    };
    SmtpError::new(kind, format!("{}: {}", context, e)).with_cause(e)
}
