//! Relay client.
//!
//! Delivers one composed message per SMTP session:
//! - EHLO (HELO fallback) and opportunistic STARTTLS
//! - Optional AUTH for relays that require credentials
//! - MAIL FROM, RCPT TO, DATA and QUIT
//!
//! Every failure is tagged with the [`DeliveryStage`] it happened in.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::{MailboxConfig, RelayConfig, TlsMode};
use crate::errors::{DeliveryError, DeliveryStage, SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MimeEncoder;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{SmtpTransport, TcpTransport};
use crate::types::{Address, EmailMessage, SendReceipt};

/// Something that can deliver a composed message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers one message in its own session.
    async fn deliver(&self, message: &EmailMessage) -> Result<SendReceipt, DeliveryError>;
}

/// SMTP relay client.
#[derive(Debug, Clone)]
pub struct RelayClient {
    /// Relay configuration.
    config: Arc<RelayConfig>,
    /// MIME encoder carrying the sender identity.
    encoder: MimeEncoder,
}

impl RelayClient {
    /// Creates a client for the relay, sending as the configured sender.
    pub fn new(config: RelayConfig, mailboxes: &MailboxConfig) -> SmtpResult<Self> {
        config
            .validate()
            .map_err(|e| SmtpError::configuration(e.to_string()))?;

        let from = if mailboxes.from_name.trim().is_empty() {
            Address::new(&mailboxes.from_address)
        } else {
            Address::with_name(&mailboxes.from_name, &mailboxes.from_address)
        }
        .map_err(|e| SmtpError::new(SmtpErrorKind::InvalidFromAddress, e.message()))?;

        Ok(Self {
            config: Arc::new(config),
            encoder: MimeEncoder::new(from),
        })
    }

    /// Returns the relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs a complete session over an already connected transport.
    ///
    /// When everything before it succeeded, a failed QUIT fails the delivery.
    /// After an earlier failure QUIT is only attempted if the connection is
    /// still usable, and its outcome is only logged.
    pub async fn run_session<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        message: &EmailMessage,
        data: &[u8],
        started: Instant,
    ) -> Result<SendReceipt, DeliveryError> {
        let response = match self.transact(transport, message, data).await {
            Ok(response) => response,
            Err(err) => {
                if connection_lost(err.smtp_error()) {
                    tracing::debug!(error = %err, "connection lost, skipping QUIT");
                } else {
                    match transport.send_command(&SmtpCommand::Quit).await {
                        Ok(reply) if reply.is_success() => {}
                        Ok(reply) => tracing::debug!(reply = %reply, "QUIT rejected after failed delivery"),
                        Err(e) => tracing::warn!(error = %e, "QUIT failed after failed delivery"),
                    }
                }
                let _ = transport.close().await;
                return Err(err);
            }
        };

        let quit = transport.send_command(&SmtpCommand::Quit).await;
        let _ = transport.close().await;

        match quit {
            Ok(reply) if reply.is_success() => {}
            Ok(reply) => return Err(DeliveryError::new(DeliveryStage::SessionClose, reply.to_error())),
            Err(e) => return Err(DeliveryError::new(DeliveryStage::SessionClose, e)),
        }

        Ok(SendReceipt {
            recipient: message.to.clone(),
            response: response.to_string(),
            tls: transport.is_tls(),
            duration: started.elapsed(),
        })
    }

    async fn transact<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        message: &EmailMessage,
        data: &[u8],
    ) -> Result<SmtpResponse, DeliveryError> {
        self.handshake(transport)
            .await
            .map_err(|e| DeliveryError::new(DeliveryStage::Handshake, e))?;

        self.envelope(transport, message, data).await?;

        self.transcript(transport, data)
            .await
            .map_err(|e| DeliveryError::new(DeliveryStage::Transcript, e))
    }

    /// EHLO, STARTTLS and AUTH.
    async fn handshake<T: SmtpTransport + ?Sized>(&self, transport: &mut T) -> SmtpResult<()> {
        let capabilities = self.greet(transport).await?;
        transport.set_capabilities(capabilities);

        if !transport.is_tls() {
            self.negotiate_tls(transport).await?;
        }

        if let Some(credentials) = self.config.credentials() {
            self.authenticate(transport, &credentials).await?;
        }

        Ok(())
    }

    async fn greet<T: SmtpTransport + ?Sized>(&self, transport: &mut T) -> SmtpResult<EsmtpCapabilities> {
        let client_id = self.config.client_id().to_string();

        let response = transport.send_command(&SmtpCommand::Ehlo(client_id.clone())).await?;
        if response.is_success() {
            return Ok(EsmtpCapabilities::from_ehlo_response(&response));
        }

        tracing::debug!(reply = %response, "EHLO rejected, falling back to HELO");
        let response = transport.send_command(&SmtpCommand::Helo(client_id)).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        Ok(EsmtpCapabilities::default())
    }

    async fn negotiate_tls<T: SmtpTransport + ?Sized>(&self, transport: &mut T) -> SmtpResult<()> {
        let mode = self.config.tls.mode;
        if mode == TlsMode::None {
            return Ok(());
        }

        let offered = transport.capabilities().map(|c| c.starttls).unwrap_or(false);
        if !offered {
            if mode == TlsMode::Required {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    "Server does not offer STARTTLS",
                ));
            }
            tracing::warn!(host = %self.config.host, "STARTTLS not offered, continuing without TLS");
            return Ok(());
        }

        let response = transport.send_command(&SmtpCommand::StartTls).await?;
        if !response.is_success() {
            let mut err = SmtpError::new(
                SmtpErrorKind::StarttlsNotSupported,
                format!("STARTTLS rejected: {}", response),
            )
            .with_smtp_code(response.code);
            if let Some(enhanced) = response.enhanced_code {
                err = err.with_enhanced_code(enhanced);
            }
            return Err(err);
        }

        transport
            .upgrade_tls(&self.config.tls, self.config.tls_server_name())
            .await?;

        // Capabilities must be re-read over the encrypted channel.
        let response = transport
            .send_command(&SmtpCommand::Ehlo(self.config.client_id().to_string()))
            .await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        transport.set_capabilities(EsmtpCapabilities::from_ehlo_response(&response));

        Ok(())
    }

    async fn authenticate<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let available: Vec<AuthMethod> = transport
            .capabilities()
            .map(|c| c.auth_mechanisms.iter().copied().collect())
            .unwrap_or_default();

        let method = Authenticator::select_method(&available, self.config.auth_method, transport.is_tls())?;
        tracing::debug!(method = %method, username = %credentials.username, "Authenticating");

        match method {
            AuthMethod::Plain => self.auth_plain(transport, credentials).await,
            AuthMethod::Login => self.auth_login(transport, credentials).await,
        }
    }

    async fn auth_plain<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Plain.mechanism_name().to_string(),
            initial_response: Some(Authenticator::plain_initial_response(credentials)),
        };

        let response = transport.send_command(&command).await?;
        if response.code == codes::AUTH_SUCCESS {
            Ok(())
        } else {
            Err(response.to_error())
        }
    }

    async fn auth_login<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Login.mechanism_name().to_string(),
            initial_response: None,
        };

        let response = transport.send_command(&command).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Err(response.to_error());
        }

        let username = Authenticator::login_username(credentials);
        transport.send_data(format!("{}\r\n", username).as_bytes()).await?;

        let response = transport.read_response().await?;
        if response.code != codes::AUTH_CONTINUE {
            return Err(response.to_error());
        }

        let password = Authenticator::login_password(credentials);
        transport.send_data(format!("{}\r\n", password).as_bytes()).await?;

        let response = transport.read_response().await?;
        if response.code == codes::AUTH_SUCCESS {
            Ok(())
        } else {
            Err(response.to_error())
        }
    }

    /// MAIL FROM and RCPT TO; failures name the address concerned.
    async fn envelope<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        message: &EmailMessage,
        data: &[u8],
    ) -> Result<(), DeliveryError> {
        let sender = self.encoder.from_address();
        let size = transport
            .capabilities()
            .and_then(|c| c.size)
            .map(|_| data.len());

        let mail_from = SmtpCommand::MailFrom {
            address: sender.to_smtp(),
            size,
        };
        Self::expect_success(transport, &mail_from)
            .await
            .map_err(|e| DeliveryError::rejected(sender.email(), e))?;

        let recipient = Address::new(message.to.as_str())
            .map_err(|e| DeliveryError::rejected(&message.to, e))?;
        let rcpt_to = SmtpCommand::RcptTo {
            address: recipient.to_smtp(),
        };
        Self::expect_success(transport, &rcpt_to)
            .await
            .map_err(|e| DeliveryError::rejected(recipient.email(), e))?;

        Ok(())
    }

    /// DATA, the message content and the final reply.
    async fn transcript<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        data: &[u8],
    ) -> SmtpResult<SmtpResponse> {
        let response = transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        transport.send_data(data).await?;

        let response = transport.read_response().await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        Ok(response)
    }

    async fn expect_success<T: SmtpTransport + ?Sized>(
        transport: &mut T,
        command: &SmtpCommand,
    ) -> SmtpResult<SmtpResponse> {
        let response = transport.send_command(command).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.to_error())
        }
    }

    /// Encodes and dot-stuffs a message for DATA.
    pub fn prepare(&self, message: &EmailMessage) -> SmtpResult<Vec<u8>> {
        let encoded = self.encoder.encode(message)?;
        Ok(MimeEncoder::prepare_data_content(&encoded))
    }
}

#[async_trait]
impl Mailer for RelayClient {
    async fn deliver(&self, message: &EmailMessage) -> Result<SendReceipt, DeliveryError> {
        let started = Instant::now();

        let data = self
            .prepare(message)
            .map_err(|e| DeliveryError::new(DeliveryStage::Transcript, e))?;

        let mut transport = TcpTransport::connect(&self.config)
            .await
            .map_err(|e| DeliveryError::new(DeliveryStage::Connect, e))?;

        self.run_session(&mut transport, message, &data, started).await
    }
}

/// A failure with no server reply that left the socket closed or stalled.
fn connection_lost(error: &SmtpError) -> bool {
    error.smtp_code().is_none()
        && matches!(
            error.kind(),
            SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::ConnectTimeout
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{data_ready_response, ehlo_response, MockTransport};
    use crate::protocol::SmtpResponse;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "ada@example.com".into(),
            subject: "Hello".into(),
            text: "Hi".into(),
            html: "<p>Hi</p>".into(),
            reply_to: "team@example.com".into(),
        }
    }

    fn client(config: RelayConfig) -> RelayClient {
        RelayClient::new(config, &MailboxConfig::default()).unwrap()
    }

    fn plaintext_client() -> RelayClient {
        client(RelayConfig::builder().host("relay.test").no_tls().build().unwrap())
    }

    async fn run(client: &RelayClient, transport: &mut MockTransport) -> Result<SendReceipt, DeliveryError> {
        let data = client.prepare(&message()).unwrap();
        client.run_session(transport, &message(), &data, Instant::now()).await
    }

    fn command_names(transport: &MockTransport) -> Vec<String> {
        transport
            .recorded_commands()
            .iter()
            .map(|c| c.to_smtp_string().split(' ').next().unwrap_or("").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_successful_plaintext_session() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_response(SmtpResponse::new(250, "2.0.0 queued as 1234"))
            .queue_response(SmtpResponse::new(221, "bye"));

        let receipt = run(&client, &mut transport).await.unwrap();
        assert_eq!(receipt.recipient, "ada@example.com");
        assert!(!receipt.tls);
        assert!(receipt.response.starts_with("250"));

        assert_eq!(command_names(&transport), ["EHLO", "MAIL", "RCPT", "DATA", "QUIT"]);
        let commands = transport.recorded_commands();
        assert_eq!(
            commands[1],
            SmtpCommand::MailFrom {
                address: "<web-inquiry@gathercateringandevents.com>".into(),
                size: Some(transport.received_data()[0].len()),
            }
        );
        assert_eq!(commands[2], SmtpCommand::RcptTo { address: "<ada@example.com>".into() });

        let data = String::from_utf8(transport.received_data()[0].clone()).unwrap();
        assert!(data.starts_with("From: Gather Catering and Events <web-inquiry@gathercateringandevents.com>\r\n"));
        assert!(data.ends_with("\r\n.\r\n"));
    }

    #[tokio::test]
    async fn test_starttls_upgrade_and_second_ehlo() {
        let client = client(RelayConfig::builder().host("relay.test").build().unwrap());
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(220, "ready for TLS"))
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok()
            .queue_response(SmtpResponse::new(221, "bye"));

        let receipt = run(&client, &mut transport).await.unwrap();
        assert!(receipt.tls);
        assert_eq!(
            command_names(&transport),
            ["EHLO", "STARTTLS", "EHLO", "MAIL", "RCPT", "DATA", "QUIT"]
        );
    }

    #[tokio::test]
    async fn test_starttls_not_offered_continues_in_plaintext() {
        let client = client(RelayConfig::builder().host("relay.test").build().unwrap());
        let mut transport = MockTransport::new();
        transport
            .queue_response(SmtpResponse::new(250, "relay.test"))
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok();

        let receipt = run(&client, &mut transport).await.unwrap();
        assert!(!receipt.tls);
        assert!(!command_names(&transport).contains(&"STARTTLS".to_string()));
    }

    #[tokio::test]
    async fn test_required_tls_without_starttls_fails_handshake() {
        let client = client(
            RelayConfig::builder()
                .host("relay.test")
                .tls_mode(TlsMode::Required)
                .build()
                .unwrap(),
        );
        let mut transport = MockTransport::new();
        transport.queue_response(SmtpResponse::new(250, "relay.test"));

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Handshake);
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::StarttlsNotSupported);
        assert_eq!(command_names(&transport), ["EHLO", "QUIT"]);
    }

    #[tokio::test]
    async fn test_rejected_starttls_fails_handshake() {
        let client = client(RelayConfig::builder().host("relay.test").build().unwrap());
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_error(454, "TLS not available");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Handshake);
        assert_eq!(err.smtp_error().smtp_code(), Some(454));
    }

    #[tokio::test]
    async fn test_failed_tls_upgrade_fails_handshake() {
        let client = client(RelayConfig::builder().host("relay.test").build().unwrap());
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(220, "go ahead"))
            .fail_upgrade_with(SmtpError::tls("certificate expired"));

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Handshake);
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::TlsHandshakeFailed);
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_error(502, "EHLO not implemented")
            .queue_ok()
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok();

        run(&client, &mut transport).await.unwrap();
        assert_eq!(&command_names(&transport)[..2], ["EHLO", "HELO"]);
        assert_eq!(
            transport.recorded_commands()[2],
            SmtpCommand::MailFrom {
                address: "<web-inquiry@gathercateringandevents.com>".into(),
                size: None,
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_recipient_is_an_envelope_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_error(550, "5.1.1 No such user");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Envelope);
        assert_eq!(err.address(), Some("ada@example.com"));
        assert_eq!(err.smtp_error().smtp_code(), Some(550));
        assert_eq!(command_names(&transport), ["EHLO", "MAIL", "RCPT", "QUIT"]);
    }

    #[tokio::test]
    async fn test_rejected_sender_is_an_envelope_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_error(553, "sender not allowed");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Envelope);
        assert_eq!(err.address(), Some("web-inquiry@gathercateringandevents.com"));
    }

    #[tokio::test]
    async fn test_rejected_data_is_a_transcript_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_error(554, "5.7.1 message rejected");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Transcript);
        assert_eq!(err.smtp_error().smtp_code(), Some(554));
    }

    #[tokio::test]
    async fn test_data_not_accepted_is_a_transcript_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .queue_error(451, "try later");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Transcript);
        assert!(transport.received_data().is_empty());
    }

    #[tokio::test]
    async fn test_failed_quit_after_success_is_a_session_close_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok()
            .queue_error(421, "closing");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::SessionClose);
    }

    #[tokio::test]
    async fn test_quit_error_does_not_mask_earlier_failure() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_error(550, "no")
            .fail_command_with(
                "QUIT",
                SmtpError::new(SmtpErrorKind::ConnectionReset, "gone"),
            );

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Envelope);
    }

    #[tokio::test]
    async fn test_no_quit_after_read_timeout() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport.queue_response(ehlo_response()).fail_command_with(
            "MAIL",
            SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"),
        );

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Envelope);
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::ReadTimeout);
        assert_eq!(command_names(&transport), ["EHLO", "MAIL"]);
    }

    #[tokio::test]
    async fn test_no_quit_after_reset_during_data() {
        let client = plaintext_client();
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_ok()
            .queue_ok()
            .fail_command_with("DATA", SmtpError::new(SmtpErrorKind::ConnectionReset, "reset"));

        let err = run(&client, &mut transport).await.unwrap_err();
        assert!(!command_names(&transport).contains(&"QUIT".to_string()));
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_auth_plain_over_tls() {
        let client = client(
            RelayConfig::builder()
                .host("relay.test")
                .credentials("user", "pass")
                .build()
                .unwrap(),
        );
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(220, "go ahead"))
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(235, "ok"))
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok();

        run(&client, &mut transport).await.unwrap();
        let commands = transport.recorded_commands();
        assert_eq!(
            commands[3],
            SmtpCommand::Auth {
                mechanism: "PLAIN".into(),
                initial_response: Some("AHVzZXIAcGFzcw==".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_auth_login_exchange() {
        let client = client(
            RelayConfig::builder()
                .host("relay.test")
                .credentials("user", "pass")
                .auth_method(AuthMethod::Login)
                .build()
                .unwrap(),
        );
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(220, "go ahead"))
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(334, "VXNlcm5hbWU6"))
            .queue_response(SmtpResponse::new(334, "UGFzc3dvcmQ6"))
            .queue_response(SmtpResponse::new(235, "ok"))
            .queue_ok()
            .queue_ok()
            .queue_response(data_ready_response())
            .queue_ok();

        run(&client, &mut transport).await.unwrap();
        let data = transport.received_data();
        assert_eq!(data[0], b"dXNlcg==\r\n");
        assert_eq!(data[1], b"cGFzcw==\r\n");
    }

    #[tokio::test]
    async fn test_auth_failure_is_a_handshake_failure() {
        let client = client(
            RelayConfig::builder()
                .host("relay.test")
                .credentials("user", "wrong")
                .build()
                .unwrap(),
        );
        let mut transport = MockTransport::new();
        transport
            .queue_response(ehlo_response())
            .queue_response(SmtpResponse::new(220, "go ahead"))
            .queue_response(ehlo_response())
            .queue_error(535, "5.7.8 bad credentials");

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Handshake);
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::CredentialsInvalid);
    }

    #[tokio::test]
    async fn test_credentials_never_sent_in_plaintext() {
        let client = client(
            RelayConfig::builder()
                .host("relay.test")
                .no_tls()
                .credentials("user", "pass")
                .build()
                .unwrap(),
        );
        let mut transport = MockTransport::new();
        transport.queue_response(ehlo_response());

        let err = run(&client, &mut transport).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Handshake);
        assert!(!command_names(&transport).contains(&"AUTH".to_string()));
    }

    #[tokio::test]
    async fn test_header_injection_fails_before_connecting() {
        let client = client(RelayConfig::builder().host("127.0.0.1").port(1).build().unwrap());
        let mut msg = message();
        msg.to = "ada@example.com\r\nBcc: x@example.com".into();

        let err = client.deliver(&msg).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Transcript);
        assert_eq!(err.smtp_error().kind(), SmtpErrorKind::InvalidHeader);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_a_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client(RelayConfig::builder().host("127.0.0.1").port(port).build().unwrap());
        let err = client.deliver(&message()).await.unwrap_err();
        assert_eq!(err.stage(), DeliveryStage::Connect);
    }
}
