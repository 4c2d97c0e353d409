//! Broker gateway for order execution.
//!
//! The broker is an HTTP sidecar wrapping a terminal session; every call
//! answers with a numeric `code` discriminator (0 = success). Transport
//! failures are retried a bounded number of times inside the adapter and
//! surface as `BrokerError::Transport` once exhausted. A broker-rejected buy
//! is a normal outcome and is returned in the `OrderAck`, not as an error.

mod http;

pub use http::HttpBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the broker gateway.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Transport failure after exhausting the retry budget
    #[error("Transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// The gateway answered with a non-zero discriminator
    #[error("Broker rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// Response body could not be decoded
    #[error("Failed to decode broker response: {0}")]
    Parse(String),
}

impl BrokerError {
    /// Check if retrying the call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Account funds snapshot from the gateway.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Available funds in currency units
    pub available: f64,
}

/// Acknowledgement for a submitted order.
///
/// Carries the gateway's raw discriminator so callers can distinguish a
/// placed order (`code == 0`) from a rejection without treating the latter
/// as an exceptional path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Gateway discriminator (0 = accepted)
    pub code: i64,
    /// Gateway message, when present
    pub message: Option<String>,
    /// Raw payload, when present
    pub data: Option<serde_json::Value>,
}

impl OrderAck {
    /// Check whether the order was accepted
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Broker trait for account queries and order submission.
///
/// Position and order rows keep the gateway's loose shape; the bot mirrors
/// them for visibility but never reads individual fields.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Get broker name
    fn name(&self) -> &'static str;

    /// Get available funds
    async fn balance(&self) -> Result<AccountBalance, BrokerError>;

    /// Get current positions
    async fn position(&self) -> Result<Vec<serde_json::Value>, BrokerError>;

    /// Place a limit buy order
    async fn buy(&self, code: &str, price: f64, quantity: u64) -> Result<OrderAck, BrokerError>;

    /// Get today's accepted orders
    async fn success_orders(&self) -> Result<Vec<serde_json::Value>, BrokerError>;

    /// Get today's filled orders
    async fn filled_orders(&self) -> Result<Vec<serde_json::Value>, BrokerError>;
}

// ============================================================================
// Tests
// ============================================================================
