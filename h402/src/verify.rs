//! Server-side verification of a [`SignedPayment`].
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. recompute the payload hash;
//! 2. recover the signer (low-`s` only, `v` in `{0, 1, 27, 28}`);
//! 3. the recovered address must be `payload.payer`;
//! 4. amount, recipient, resource, chain ID and token must equal the
//!    requirements, and the payload may not outlive the requirements' expiry;
//! 5. `now <= payload.expires_at`;
//! 6. atomic insert into the [`ReplayGuard`].
//!
//! Replay is checked last so that a payment rejected for any other reason
//! does not burn its nonce.

use alloy_primitives::{Address, B256, Signature, U256, hex};
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::amount::TokenAmount;
use crate::error::{Classify, ErrorClass, ErrorReason};
use crate::hash;
use crate::proto::{PaymentRequirements, PaymentSignature, SignedPayment, normalize_token};
use crate::replay::{ReplayGuard, ReplayKey};
use crate::timestamp::{Clock, SystemClock, UnixTimestamp};

/// Half the secp256k1 group order; signatures with `s` above it are rejected.
const SECP256K1N_HALF: U256 = U256::from_be_bytes(hex!(
    "7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0"
));

/// Why a payment was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The signature is malformed or does not recover to the payer.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// The payload amount differs from the requirements.
    #[error("Amount mismatch: required {expected}, authorized {actual}")]
    AmountMismatch {
        /// Required amount.
        expected: TokenAmount,
        /// Amount in the payload.
        actual: TokenAmount,
    },
    /// The payload recipient differs from the requirements.
    #[error("Recipient mismatch: required {expected}, authorized {actual}")]
    RecipientMismatch {
        /// Required recipient.
        expected: Address,
        /// Recipient in the payload.
        actual: Address,
    },
    /// The payload resource differs from the requirements.
    #[error("Resource mismatch: required {expected}, authorized {actual}")]
    ResourceMismatch {
        /// Required resource.
        expected: String,
        /// Resource in the payload.
        actual: String,
    },
    /// The payload chain ID differs from the requirements' network.
    #[error("Network mismatch: required chain {expected}, authorized chain {actual}")]
    NetworkMismatch {
        /// Chain ID of the required network.
        expected: u64,
        /// Chain ID in the payload.
        actual: u64,
    },
    /// The payload token differs from the requirements.
    #[error("Token mismatch: required {expected:?}, authorized {actual:?}")]
    TokenMismatch {
        /// Required token, `None` for the native asset.
        expected: Option<Address>,
        /// Token in the payload.
        actual: Option<Address>,
    },
    /// The payload expires after the requirements do.
    #[error("Expiry mismatch: requirements expire at {ceiling}, payload at {actual}")]
    ExpiryMismatch {
        /// Requirements' expiry.
        ceiling: UnixTimestamp,
        /// Payload's expiry.
        actual: UnixTimestamp,
    },
    /// The payload has expired.
    #[error("Payment expired at {expires_at}, now {now}")]
    ExpiredPayment {
        /// Payload's expiry.
        expires_at: UnixTimestamp,
        /// Verification time.
        now: UnixTimestamp,
    },
    /// The nonce was already consumed.
    #[error("Nonce already used")]
    ReplayedNonce,
}

impl VerifyError {
    /// Stable reason code for response bodies and logs.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            Self::InvalidSignature(_) => ErrorReason::InvalidSignature,
            Self::AmountMismatch { .. } => ErrorReason::AmountMismatch,
            Self::RecipientMismatch { .. } => ErrorReason::RecipientMismatch,
            Self::ResourceMismatch { .. } => ErrorReason::ResourceMismatch,
            Self::NetworkMismatch { .. } => ErrorReason::NetworkMismatch,
            Self::TokenMismatch { .. } => ErrorReason::TokenMismatch,
            Self::ExpiryMismatch { .. } => ErrorReason::ExpiryMismatch,
            Self::ExpiredPayment { .. } => ErrorReason::ExpiredPayment,
            Self::ReplayedNonce => ErrorReason::ReplayedNonce,
        }
    }
}

impl Classify for VerifyError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Recovers the address that produced `signature` over `digest`.
///
/// # Errors
///
/// Returns [`VerifyError::InvalidSignature`] for an unknown `v`, a high `s`,
/// or a signature that does not recover.
pub fn recover_signer(signature: &PaymentSignature, digest: &B256) -> Result<Address, VerifyError> {
    let parity = match signature.v() {
        0 | 27 => false,
        1 | 28 => true,
        v => {
            return Err(VerifyError::InvalidSignature(format!(
                "unsupported recovery id {v}"
            )));
        }
    };
    let r = U256::from_be_bytes(signature.r().0);
    let s = U256::from_be_bytes(signature.s().0);
    if s > SECP256K1N_HALF {
        return Err(VerifyError::InvalidSignature("non-canonical high s".into()));
    }
    Signature::new(r, s, parity)
        .recover_address_from_prehash(digest)
        .map_err(|e| VerifyError::InvalidSignature(e.to_string()))
}

/// Runs the full check sequence against `requirements` at time `now`.
///
/// On success the nonce is recorded in `guard` and the payer is returned.
///
/// # Errors
///
/// Returns the first failing check as a [`VerifyError`].
pub fn verify_payment(
    signed: &SignedPayment,
    requirements: &PaymentRequirements,
    guard: &ReplayGuard,
    now: UnixTimestamp,
) -> Result<Address, VerifyError> {
    let payment = &signed.payment;

    let digest = hash::hash(payment);
    let recovered = recover_signer(&signed.signature, &digest)?;
    if recovered != payment.payer {
        return Err(VerifyError::InvalidSignature(format!(
            "recovered {recovered}, payload claims {}",
            payment.payer
        )));
    }

    if payment.amount != requirements.amount {
        return Err(VerifyError::AmountMismatch {
            expected: requirements.amount,
            actual: payment.amount,
        });
    }
    if payment.recipient != requirements.recipient {
        return Err(VerifyError::RecipientMismatch {
            expected: requirements.recipient,
            actual: payment.recipient,
        });
    }
    if payment.resource != requirements.resource {
        return Err(VerifyError::ResourceMismatch {
            expected: requirements.resource.clone(),
            actual: payment.resource.clone(),
        });
    }
    let expected_chain = requirements.network.chain_id();
    if payment.chain_id != expected_chain {
        return Err(VerifyError::NetworkMismatch {
            expected: expected_chain,
            actual: payment.chain_id,
        });
    }
    let (expected_token, actual_token) = (
        normalize_token(requirements.token),
        normalize_token(payment.token),
    );
    if actual_token != expected_token {
        return Err(VerifyError::TokenMismatch {
            expected: expected_token,
            actual: actual_token,
        });
    }
    if let Some(ceiling) = requirements.expires_at
        && payment.expires_at > ceiling
    {
        return Err(VerifyError::ExpiryMismatch {
            ceiling,
            actual: payment.expires_at,
        });
    }

    if now > payment.expires_at {
        return Err(VerifyError::ExpiredPayment {
            expires_at: payment.expires_at,
            now,
        });
    }

    let key = ReplayKey {
        payer: payment.payer,
        resource: payment.resource.clone(),
        nonce: payment.nonce,
    };
    guard
        .check_and_insert(key, payment.expires_at)
        .map_err(|_| VerifyError::ReplayedNonce)?;

    Ok(recovered)
}

/// A verifier bound to a shared [`ReplayGuard`] and a clock.
///
/// Cheap to clone; clones share the same guard.
#[derive(Clone)]
pub struct Verifier {
    guard: Arc<ReplayGuard>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("remembered_nonces", &self.guard.len())
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Creates a verifier reading the system clock.
    #[must_use]
    pub fn new(guard: Arc<ReplayGuard>) -> Self {
        Self {
            guard,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The replay guard this verifier writes to.
    #[must_use]
    pub const fn guard(&self) -> &Arc<ReplayGuard> {
        &self.guard
    }

    /// The clock this verifier reads.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Verifies `signed` against `requirements` and returns the payer.
    ///
    /// Every rejection is logged at `warn` with its reason code.
    ///
    /// # Errors
    ///
    /// See [`verify_payment`].
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "h402.verify",
            skip_all,
            fields(resource = %requirements.resource, payer = %signed.payment.payer)
        )
    )]
    pub fn verify(
        &self,
        signed: &SignedPayment,
        requirements: &PaymentRequirements,
    ) -> Result<Address, VerifyError> {
        let result = verify_payment(signed, requirements, &self.guard, self.clock.now());
        #[cfg(feature = "telemetry")]
        match &result {
            Ok(payer) => tracing::debug!(%payer, "payment verified"),
            Err(e) => tracing::warn!(reason = %e.reason(), error = %e, "payment rejected"),
        }
        result
    }
}
