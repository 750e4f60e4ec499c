//! Signer backed by a remote key-management service.
//!
//! The service is reached through [`KeyManagementClient`], which only has to
//! return a SEC1 public key and raw `(r, s)` pairs. Most HSM and cloud KMS
//! APIs do not return a recovery id, so [`RemoteSigner`] recovers it by trial
//! against its own address and folds `s` into the lower half of the curve
//! order before emitting the signature.

use alloy_primitives::{Address, B256, Signature, U256, hex};
use async_trait::async_trait;
use h402::hash;
use h402::proto::{PaymentPayload, PaymentSignature};
use h402::signer::{PaymentSigner, SignerError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;

#[cfg(feature = "telemetry")]
use tracing::instrument;

const SECP256K1N: U256 = U256::from_be_bytes(hex!(
    "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141"
));
const SECP256K1N_HALF: U256 = U256::from_be_bytes(hex!(
    "7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0"
));

/// Default bound on each call to the key-management service.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies a key inside a key-management service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRef {
    /// Key identifier or ARN.
    pub key_id: String,
    /// Region or location of the key.
    pub region: String,
}

impl KeyRef {
    /// Creates a key reference.
    #[must_use]
    pub fn new(key_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            region: region.into(),
        }
    }
}

/// Failures reported by a [`KeyManagementClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KmsError {
    /// Network failure, throttling or service outage.
    #[error("Key management service unavailable: {0}")]
    Unavailable(String),
    /// Access denied, disabled key, wrong key type.
    #[error("Key management service rejected the request: {0}")]
    Rejected(String),
}

impl From<KmsError> for SignerError {
    fn from(value: KmsError) -> Self {
        match value {
            KmsError::Unavailable(msg) => Self::Unavailable(msg),
            KmsError::Rejected(msg) => Self::Rejected(msg),
        }
    }
}

/// The key-management service as seen by [`RemoteSigner`].
#[async_trait]
pub trait KeyManagementClient: Send + Sync {
    /// Returns the 65-byte uncompressed SEC1 public key (`0x04 ‖ x ‖ y`).
    async fn public_key(&self, key: &KeyRef) -> Result<Vec<u8>, KmsError>;

    /// Signs a 32-byte digest and returns `(r, s)`.
    async fn sign_digest(&self, key: &KeyRef, digest: B256) -> Result<(B256, B256), KmsError>;
}

/// A [`PaymentSigner`] whose key never leaves the key-management service.
///
/// The address is fetched once and cached. Every remote call is bounded by
/// the configured timeout; a timeout surfaces as
/// [`SignerError::Unavailable`].
pub struct RemoteSigner<K> {
    client: K,
    key: KeyRef,
    timeout: Duration,
    address: OnceCell<Address>,
}

impl<K> fmt::Debug for RemoteSigner<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .field("address", &self.address.get())
            .finish_non_exhaustive()
    }
}

impl<K: KeyManagementClient> RemoteSigner<K> {
    /// Creates a signer for `key` using [`DEFAULT_CALL_TIMEOUT`].
    #[must_use]
    pub fn new(client: K, key: KeyRef) -> Self {
        Self {
            client,
            key,
            timeout: DEFAULT_CALL_TIMEOUT,
            address: OnceCell::new(),
        }
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The key this signer uses.
    #[must_use]
    pub const fn key(&self) -> &KeyRef {
        &self.key
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, SignerError>
    where
        F: Future<Output = Result<T, KmsError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SignerError::from),
            Err(_) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(op, key_id = %self.key.key_id, timeout = ?self.timeout, "key management call timed out");
                Err(SignerError::Unavailable(format!(
                    "{op} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.remote_signer.address", skip_all, fields(key_id = %self.key.key_id), err)
    )]
    async fn fetch_address(&self) -> Result<Address, SignerError> {
        let public_key = self
            .bounded("public_key", self.client.public_key(&self.key))
            .await?;
        address_from_sec1(&public_key)
    }

    async fn cached_address(&self) -> Result<Address, SignerError> {
        self.address
            .get_or_try_init(|| self.fetch_address())
            .await
            .copied()
    }
}

fn address_from_sec1(public_key: &[u8]) -> Result<Address, SignerError> {
    match public_key {
        [0x04, rest @ ..] if rest.len() == 64 => Ok(Address::from_raw_public_key(rest)),
        _ => Err(SignerError::Rejected(format!(
            "expected a 65-byte uncompressed public key, got {} bytes",
            public_key.len()
        ))),
    }
}

/// Folds `s` into the lower half of the group order and finds the recovery
/// id that yields `expected`.
fn normalize_and_recover(
    r: B256,
    s: B256,
    digest: &B256,
    expected: Address,
) -> Result<PaymentSignature, SignerError> {
    let r = U256::from_be_bytes(r.0);
    let mut s = U256::from_be_bytes(s.0);
    if s > SECP256K1N_HALF {
        s = SECP256K1N - s;
    }
    [false, true]
        .into_iter()
        .map(|parity| Signature::new(r, s, parity))
        .find(|candidate| {
            candidate
                .recover_address_from_prehash(digest)
                .is_ok_and(|recovered| recovered == expected)
        })
        .map(PaymentSignature::from)
        .ok_or_else(|| {
            SignerError::Rejected("signature does not recover to the key's address".into())
        })
}

impl<K: KeyManagementClient> PaymentSigner for RemoteSigner<K> {
    async fn address(&self) -> Result<Address, SignerError> {
        self.cached_address().await
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.remote_signer.sign", skip_all, fields(key_id = %self.key.key_id), err)
    )]
    async fn sign_payment(&self, payload: &PaymentPayload) -> Result<PaymentSignature, SignerError> {
        let own = self.cached_address().await?;
        if payload.payer != own {
            return Err(SignerError::Rejected(format!(
                "payload payer {} is not signer {own}",
                payload.payer
            )));
        }
        let digest = hash::hash(payload);
        let (r, s) = self
            .bounded("sign_digest", self.client.sign_digest(&self.key, digest))
            .await?;
        normalize_and_recover(r, s, &digest, own)
    }
}
