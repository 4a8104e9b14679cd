//! Test doubles.
//!
//! - [`MockTransport`]: a scripted [`SmtpTransport`] for protocol-level tests
//! - [`FakeRelay`]: an in-process SMTP server on a loopback port that records
//!   every session, for end-to-end tests through real sockets

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::{RelayConfig, TlsConfig, TlsMode};
use crate::errors::{SmtpError, SmtpResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;
use crate::types::InquiryRecord;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock SMTP transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    /// Recorded commands.
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    /// Queued responses.
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    /// Default response.
    default_response: SmtpResponse,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled.
    tls_enabled: bool,
    /// Data received.
    data_received: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulate failure on the next call.
    fail_next: Arc<Mutex<Option<SmtpError>>>,
    /// Simulate failure of the TLS upgrade.
    fail_upgrade: Arc<Mutex<Option<SmtpError>>>,
    /// Simulate failure of a command by verb.
    fail_commands: Arc<Mutex<Vec<(String, SmtpError)>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            capabilities: None,
            tls_enabled: false,
            data_received: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
            fail_upgrade: Arc::new(Mutex::new(None)),
            fail_commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Queues an OK response.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error response.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Sets the next call to fail.
    pub fn fail_next_with(&self, error: SmtpError) -> &Self {
        *lock(&self.fail_next) = Some(error);
        self
    }

    /// Sets the TLS upgrade to fail.
    pub fn fail_upgrade_with(&self, error: SmtpError) -> &Self {
        *lock(&self.fail_upgrade) = Some(error);
        self
    }

    /// Makes the first command with the given verb fail with an I/O-level error.
    pub fn fail_command_with(&self, verb: &str, error: SmtpError) -> &Self {
        lock(&self.fail_commands).push((verb.to_uppercase(), error));
        self
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        lock(&self.commands).clone()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        lock(&self.data_received).clone()
    }

    fn get_next_response(&self) -> SmtpResponse {
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn take_command_failure(&self, command: &SmtpCommand) -> Option<SmtpError> {
        let text = command.to_smtp_string();
        let verb = text.split(' ').next().unwrap_or("");
        let mut failures = lock(&self.fail_commands);
        let index = failures.iter().position(|(v, _)| v == verb)?;
        Some(failures.remove(index).1)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }

        lock(&self.commands).push(command.clone());

        if let Some(error) = self.take_command_failure(command) {
            return Err(error);
        }

        Ok(self.get_next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }

        lock(&self.data_received).push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }

        Ok(self.get_next_response())
    }

    async fn upgrade_tls(&mut self, _config: &TlsConfig, _server_name: &str) -> SmtpResult<()> {
        if let Some(error) = lock(&self.fail_upgrade).take() {
            return Err(error);
        }

        self.tls_enabled = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        Ok(())
    }

    fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    fn set_capabilities(&mut self, caps: EsmtpCapabilities) {
        self.capabilities = Some(caps);
    }
}

/// Creates an EHLO response with standard capabilities.
pub fn ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message: vec![
            "smtp.example.com Hello".to_string(),
            "SIZE 10485760".to_string(),
            "AUTH PLAIN LOGIN CRAM-MD5".to_string(),
            "STARTTLS".to_string(),
            "8BITMIME".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
        ],
        is_multiline: true,
    }
}

/// Creates a DATA ready response.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

/// The inquiry used throughout the tests.
pub fn ada_lovelace() -> InquiryRecord {
    InquiryRecord {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: None,
        services: vec!["Catering".to_string(), "Bar Service".to_string()],
        budget: None,
        details: None,
        timestamp: "2025-03-01T12:00:00Z".to_string(),
    }
}

/// How a [`FakeRelay`] treats incoming sessions.
#[derive(Debug, Clone, Default)]
pub struct FakeRelayBehavior {
    /// Advertise STARTTLS in the EHLO reply. The command itself is always
    /// refused with 454.
    pub advertise_starttls: bool,
    /// Refuse every MAIL FROM with 553.
    pub reject_mail_from: bool,
    /// Recipients refused with 550.
    pub reject_recipients: Vec<String>,
    /// Refuse every message after its data with 554.
    pub reject_data: bool,
    /// Close the socket on QUIT without replying.
    pub drop_on_quit: bool,
    /// Wait this long before sending the greeting.
    pub greeting_delay: Duration,
}

/// One SMTP session seen by a [`FakeRelay`].
#[derive(Debug, Clone, Default)]
pub struct RecordedSession {
    /// Command lines as received.
    pub commands: Vec<String>,
    /// Accepted envelope sender.
    pub mail_from: Option<String>,
    /// Accepted recipients.
    pub recipients: Vec<String>,
    /// Message content with dot-stuffing removed and without the terminator.
    pub data: Option<String>,
}

/// In-process SMTP relay for tests.
#[derive(Debug)]
pub struct FakeRelay {
    addr: SocketAddr,
    sessions: Arc<Mutex<Vec<RecordedSession>>>,
    handle: JoinHandle<()>,
}

impl FakeRelay {
    /// Starts a relay that accepts everything.
    pub async fn start() -> io::Result<Self> {
        Self::start_with(FakeRelayBehavior::default()).await
    }

    /// Starts a relay with the given behavior.
    pub async fn start_with(behavior: FakeRelayBehavior) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(behavior);

        let handle = tokio::spawn({
            let sessions = Arc::clone(&sessions);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let index = {
                        let mut all = lock(&sessions);
                        all.push(RecordedSession::default());
                        all.len() - 1
                    };
                    let sessions = Arc::clone(&sessions);
                    let behavior = Arc::clone(&behavior);
                    tokio::spawn(async move {
                        if let Err(e) = serve_session(socket, &behavior, &sessions, index).await {
                            tracing::debug!(error = %e, "fake relay session ended with error");
                        }
                    });
                }
            }
        });

        Ok(Self { addr, sessions, handle })
    }

    /// Returns the port the relay listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Relay configuration pointing at this server.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_string(),
            port: self.port(),
            tls: TlsConfig {
                mode: TlsMode::Opportunistic,
                ..Default::default()
            },
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Returns every session seen so far.
    pub fn sessions(&self) -> Vec<RecordedSession> {
        lock(&self.sessions).clone()
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_session(
    socket: TcpStream,
    behavior: &FakeRelayBehavior,
    sessions: &Mutex<Vec<RecordedSession>>,
    index: usize,
) -> io::Result<()> {
    let mut stream = BufReader::new(socket);
    if !behavior.greeting_delay.is_zero() {
        tokio::time::sleep(behavior.greeting_delay).await;
    }
    stream.write_all(b"220 fake.relay ESMTP ready\r\n").await?;

    let record = |f: &dyn Fn(&mut RecordedSession)| {
        if let Some(session) = lock(sessions).get_mut(index) {
            f(session);
        }
    };

    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        record(&|s: &mut RecordedSession| s.commands.push(line.clone()));

        let verb = line.split(' ').next().unwrap_or("").to_uppercase();
        let reply: String = match verb.as_str() {
            "EHLO" => {
                let mut reply = String::from("250-fake.relay\r\n250-SIZE 10485760\r\n250-8BITMIME\r\n");
                if behavior.advertise_starttls {
                    reply.push_str("250-STARTTLS\r\n");
                }
                reply.push_str("250 ENHANCEDSTATUSCODES\r\n");
                reply
            }
            "HELO" | "NOOP" | "RSET" => "250 2.0.0 OK\r\n".to_string(),
            "STARTTLS" => "454 4.7.0 TLS not available\r\n".to_string(),
            "MAIL" if behavior.reject_mail_from => "553 5.7.1 Sender not allowed\r\n".to_string(),
            "MAIL" => {
                let sender = angle_address(&line);
                record(&|s: &mut RecordedSession| s.mail_from = Some(sender.clone()));
                "250 2.1.0 OK\r\n".to_string()
            }
            "RCPT" => {
                let recipient = angle_address(&line);
                if behavior.reject_recipients.iter().any(|r| r.eq_ignore_ascii_case(&recipient)) {
                    "550 5.1.1 No such user\r\n".to_string()
                } else {
                    record(&|s: &mut RecordedSession| s.recipients.push(recipient.clone()));
                    "250 2.1.5 OK\r\n".to_string()
                }
            }
            "DATA" => {
                stream
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let data = read_data(&mut stream).await?;
                record(&|s: &mut RecordedSession| s.data = Some(data.clone()));
                if behavior.reject_data {
                    "554 5.7.1 Message rejected\r\n".to_string()
                } else {
                    "250 2.0.0 OK queued\r\n".to_string()
                }
            }
            "QUIT" if behavior.drop_on_quit => return Ok(()),
            "QUIT" => {
                stream.write_all(b"221 2.0.0 Bye\r\n").await?;
                return Ok(());
            }
            _ => "502 5.5.2 Command not recognized\r\n".to_string(),
        };

        stream.write_all(reply.as_bytes()).await?;
    }
}

async fn read_data(stream: &mut BufReader<TcpStream>) -> io::Result<String> {
    let mut data = String::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "data not terminated"));
        }
        if line == ".\r\n" {
            return Ok(data);
        }
        match line.strip_prefix('.') {
            Some(rest) => data.push_str(rest),
            None => data.push_str(&line),
        }
    }
}

fn angle_address(line: &str) -> String {
    match (line.find('<'), line.find('>')) {
        (Some(start), Some(end)) if start < end => line[start + 1..end].to_string(),
        _ => String::new(),
    }
}
