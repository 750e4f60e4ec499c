//! Error classification shared by every crate in the workspace.
//!
//! Each concern has its own `thiserror` enum ([`CodecError`](crate::codec::CodecError),
//! [`VerifyError`](crate::verify::VerifyError), [`SignerError`](crate::signer::SignerError),
//! and the HTTP-side errors). They all implement [`Classify`], so a caller can
//! decide whether to retry, re-prompt or give up without matching on strings.

use serde::{Deserialize, Serialize};

use crate::amount::AmountParseError;
use crate::codec::CodecError;
use crate::networks::UnknownNetwork;

/// Coarse category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The input was malformed. Never retried.
    MalformedInput,
    /// A local policy declined the operation. No side effects happened.
    Policy,
    /// A payment failed verification. Security relevant.
    Validation,
    /// A dependency was unavailable. The caller may retry.
    Transient,
    /// A dependency refused the operation. Retrying will not help.
    Permanent,
}

impl ErrorClass {
    /// Whether a caller-driven retry could succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Maps an error onto its [`ErrorClass`].
pub trait Classify {
    /// Returns the class of this error.
    fn class(&self) -> ErrorClass;
}

impl Classify for UnknownNetwork {
    fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

impl Classify for AmountParseError {
    fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

impl Classify for CodecError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedRequirements(_) | Self::MalformedPayment(_) => {
                ErrorClass::MalformedInput
            }
            Self::Serialize(_) => ErrorClass::Permanent,
        }
    }
}

/// Machine-readable reason codes carried in rejection bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorReason {
    /// A header could not be decoded.
    InvalidFormat,
    /// The signature does not recover to the payer.
    InvalidSignature,
    /// The amount differs from the requirements.
    AmountMismatch,
    /// The recipient differs from the requirements.
    RecipientMismatch,
    /// The resource differs from the requirements.
    ResourceMismatch,
    /// The chain ID differs from the requirements' network.
    NetworkMismatch,
    /// The token differs from the requirements.
    TokenMismatch,
    /// The payload outlives the requirements' expiry.
    ExpiryMismatch,
    /// The payment has expired.
    ExpiredPayment,
    /// The nonce has already been used.
    ReplayedNonce,
    /// The request carried no payment.
    PaymentRequired,
}

impl ErrorReason {
    /// Returns the `snake_case` string used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid_format",
            Self::InvalidSignature => "invalid_signature",
            Self::AmountMismatch => "amount_mismatch",
            Self::RecipientMismatch => "recipient_mismatch",
            Self::ResourceMismatch => "resource_mismatch",
            Self::NetworkMismatch => "network_mismatch",
            Self::TokenMismatch => "token_mismatch",
            Self::ExpiryMismatch => "expiry_mismatch",
            Self::ExpiredPayment => "expired_payment",
            Self::ReplayedNonce => "replayed_nonce",
            Self::PaymentRequired => "payment_required",
        }
    }
}

impl core::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serde_matches_as_str() {
        for reason in [
            ErrorReason::InvalidFormat,
            ErrorReason::InvalidSignature,
            ErrorReason::AmountMismatch,
            ErrorReason::RecipientMismatch,
            ErrorReason::ResourceMismatch,
            ErrorReason::NetworkMismatch,
            ErrorReason::TokenMismatch,
            ErrorReason::ExpiryMismatch,
            ErrorReason::ExpiredPayment,
            ErrorReason::ReplayedNonce,
            ErrorReason::PaymentRequired,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_codec_errors_are_malformed_input() {
        let err = CodecError::MalformedPayment("bad".into());
        assert_eq!(err.class(), ErrorClass::MalformedInput);
        assert!(!err.class().is_retryable());
        assert_eq!(UnknownNetwork("x".into()).class(), ErrorClass::MalformedInput);
    }
}
