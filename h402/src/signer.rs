//! The signing capability a payer needs.
//!
//! Implementations live in `h402-evm`: an in-memory key and a remote
//! key-management backend. Both hash the payload themselves through
//! [`crate::hash::hash`]; nothing here accepts a caller-supplied digest.

use alloy_primitives::Address;
use std::future::Future;
use std::sync::Arc;

use crate::error::{Classify, ErrorClass};
use crate::proto::{PaymentPayload, PaymentSignature};

/// Failures raised by a [`PaymentSigner`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The backend could not be reached or timed out. Transient.
    #[error("Signing unavailable: {0}")]
    Unavailable(String),
    /// The backend refused to sign. Permanent.
    #[error("Signing rejected: {0}")]
    Rejected(String),
}

impl SignerError {
    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Classify for SignerError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::Transient,
            Self::Rejected(_) => ErrorClass::Permanent,
        }
    }
}

/// Produces signatures over payment payloads.
///
/// Signatures are 65 bytes with `v` in `{27, 28}` and a low `s`.
pub trait PaymentSigner: Send + Sync {
    /// Returns the address payments are signed from.
    fn address(&self) -> impl Future<Output = Result<Address, SignerError>> + Send;

    /// Hashes `payload` and signs the digest.
    fn sign_payment(
        &self,
        payload: &PaymentPayload,
    ) -> impl Future<Output = Result<PaymentSignature, SignerError>> + Send;
}

impl<T: PaymentSigner> PaymentSigner for Arc<T> {
    async fn address(&self) -> Result<Address, SignerError> {
        (**self).address().await
    }

    async fn sign_payment(&self, payload: &PaymentPayload) -> Result<PaymentSignature, SignerError> {
        (**self).sign_payment(payload).await
    }
}

impl<T: PaymentSigner> PaymentSigner for &T {
    async fn address(&self) -> Result<Address, SignerError> {
        (**self).address().await
    }

    async fn sign_payment(&self, payload: &PaymentPayload) -> Result<PaymentSignature, SignerError> {
        (**self).sign_payment(payload).await
    }
}
