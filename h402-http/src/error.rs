//! Error types for the HTTP layer.

use h402::amount::TokenAmount;
use h402::codec::CodecError;
use h402::error::{Classify, ErrorClass};
use h402::signer::SignerError;
use std::time::Duration;

/// Failures of the underlying HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The call did not finish within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection, TLS or protocol failure.
    #[error("Connection failed: {0}")]
    Connection(String),
    /// The request could not be built or cloned for a retry.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Classify for TransportError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) => ErrorClass::Transient,
            Self::InvalidRequest(_) => ErrorClass::Permanent,
        }
    }
}

/// Why a 402 negotiation ended without a paid response.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The requested amount is above the configured cap. Nothing was signed.
    #[error("Payment of {amount} exceeds the limit of {max_amount}")]
    BudgetExceeded {
        /// Amount the server asked for.
        amount: TokenAmount,
        /// Configured cap.
        max_amount: TokenAmount,
    },
    /// A 402 response arrived without `X-Payment-Requirements`.
    #[error("402 response carries no payment requirements")]
    MissingRequirements,
    /// A header could not be decoded or encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The signer failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered the paid retry with another 402.
    #[error("Payment rejected by server: {reason}")]
    PaymentRejected {
        /// Reason code or body returned by the server.
        reason: String,
    },
}

impl Classify for NegotiationError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::BudgetExceeded { .. } => ErrorClass::Policy,
            Self::MissingRequirements => ErrorClass::MalformedInput,
            Self::Codec(e) => e.class(),
            Self::Signer(e) => e.class(),
            Self::Transport(e) => e.class(),
            Self::PaymentRejected { .. } => ErrorClass::Validation,
        }
    }
}
