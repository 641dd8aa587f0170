//! Transport: the messaging network the dispatch loop delivers through.
//!
//! Only the primitives the loop and the connection supervisor need are
//! modelled here; reconnection policy lives in [`crate::supervisor`].

use async_trait::async_trait;
use thiserror::Error;

use relay_common::error::AppError;

/// Errors raised by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("existence lookup failed: {0}")]
    Query(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport is not connected")]
    NotConnected,
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// Result of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// The session must be paired out-of-band with this code first.
    AwaitingPairing { code: String },
}

/// Capability to reach recipients on the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or re-open) the transport session.
    async fn connect(&self) -> Result<ConnectionState, TransportError>;

    /// Whether the session is currently usable.
    async fn is_connected(&self) -> Result<bool, TransportError>;

    /// Look up a recipient. `Some(address)` is the network address to send to;
    /// `None` means the identifier is not registered on the network.
    async fn lookup(&self, identifier: &str) -> Result<Option<String>, TransportError>;

    /// Deliver a text message to a resolved address.
    async fn send(&self, address: &str, text: &str) -> Result<(), TransportError>;

    /// Short adapter name for logs.
    fn name(&self) -> &'static str;
}
