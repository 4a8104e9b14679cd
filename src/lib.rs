//! # Gather inquiry relay
//!
//! Receives inquiry forms from the Gather Catering and Events website and
//! relays them as two emails over an SMTP relay:
//! - a confirmation to the person who submitted the form
//! - a lead notification to the catering team
//!
//! Both messages are `multipart/alternative` (plain text and HTML). Each is
//! sent in its own SMTP session with opportunistic STARTTLS, and a failed
//! send never prevents the other one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gather_inquiry::{AppState, DeliveryOrchestrator, InquiryConfig, RelayClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InquiryConfig::from_env()?;
//!
//!     let client = RelayClient::new(config.relay.clone(), &config.mailboxes)?;
//!     let orchestrator = DeliveryOrchestrator::new(config.mailboxes.clone(), Arc::new(client));
//!     let state = AppState::new(orchestrator, config.server.allowed_origins.clone());
//!
//!     let listener = tokio::net::TcpListener::bind(config.server.socket_addr()?).await?;
//!     gather_inquiry::http::serve(listener, state, gather_inquiry::http::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Message composition
pub mod compose;

// Client
pub mod client;

// Orchestration and HTTP boundary
pub mod delivery;
pub mod http;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use client::{Mailer, RelayClient};
pub use compose::compose;
pub use config::{
    ConfigError, InquiryConfig, MailboxConfig, RelayConfig, RelayConfigBuilder, ServerConfig,
    TlsConfig, TlsMode,
};
pub use delivery::DeliveryOrchestrator;
pub use errors::{
    DeliveryError, DeliveryStage, RequestError, SmtpError, SmtpErrorKind, SmtpResult,
};
pub use http::{router, AppState};
pub use types::{
    Address, Audience, DeliveryReport, EmailMessage, InquiryForm, InquiryRecord, SendReceipt,
    SubmissionResult,
};
