//! Delivery transport abstraction.
//!
//! The queue never talks to the network itself; it hands payload bytes
//! to a [`Transport`] and reacts to the outcome. The real HTTP client
//! lives in the embedding application; this crate ships only the
//! capability boundary and a null implementation.

use async_trait::async_trait;
use thiserror::Error;

/// Why a delivery attempt failed. All variants are treated identically
/// by the drain loop (unlock + advance); the split exists for logging
/// and for callers that inspect outcomes.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected report: {0}")]
    Rejected(String),
    #[error("delivery attempt timed out")]
    Timeout,
}

/// Capability that performs the actual network delivery of a payload.
///
/// Implementations own their timeouts; the queue treats a timeout like
/// any other failure and never cancels an attempt mid-flight.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Accepts and discards every report. Useful in tests and for running
/// with delivery disabled.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, _payload: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}
