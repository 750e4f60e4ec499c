//! Wire types exchanged between payer and payee.
//!
//! A server answers an unpaid request with [`PaymentRequirements`]. The
//! client turns them into a [`PaymentPayload`], signs it, and sends the
//! resulting [`SignedPayment`] back on the retry.
//!
//! All types use `camelCase` field names, omit absent optional fields and
//! reject unknown fields.

use alloy_primitives::{Address, B256, hex};
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;

use crate::amount::TokenAmount;
use crate::networks::Network;
use crate::timestamp::UnixTimestamp;

/// Canonical form of a token field: the zero address becomes `None`.
///
/// The message hash already encodes the native asset as the zero address,
/// so both spellings sign the same bytes and must compare equal.
#[must_use]
pub fn normalize_token(token: Option<Address>) -> Option<Address> {
    token.filter(|token| !token.is_zero())
}

fn deserialize_token<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Address>, D::Error> {
    Option::<Address>::deserialize(deserializer).map(normalize_token)
}

/// What a server charges for a resource.
///
/// Issued by the payee on a 402 response and treated as immutable from then
/// on.
///
/// # Example
///
/// ```rust
/// use alloy_primitives::address;
/// use h402::networks::Network;
/// use h402::proto::PaymentRequirements;
///
/// let requirements = PaymentRequirements::new(
///     1000u64.into(),
///     address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
///     Network::BaseSepolia,
///     "/data",
/// );
/// assert!(requirements.token.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentRequirements {
    /// Price in the smallest token unit.
    pub amount: TokenAmount,
    /// Address that receives the funds.
    pub recipient: Address,
    /// Network the payment must be bound to.
    pub network: Network,
    /// Opaque resource identifier, usually the request path.
    pub resource: String,
    /// Human-readable description of what is being bought.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Latest moment a payment for these requirements is acceptable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTimestamp>,
    /// Token contract; `None` means the network's native asset.
    #[serde(
        default,
        deserialize_with = "deserialize_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Address>,
}

impl PaymentRequirements {
    /// Requirements with no description, expiry or token.
    #[must_use]
    pub fn new(
        amount: TokenAmount,
        recipient: Address,
        network: Network,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            recipient,
            network,
            resource: resource.into(),
            description: None,
            expires_at: None,
            token: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: UnixTimestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the token contract. The zero address means the native asset.
    #[must_use]
    pub fn with_token(mut self, token: Address) -> Self {
        self.token = normalize_token(Some(token));
        self
    }
}

/// The authorization a payer signs.
///
/// Every field except `payer` and `nonce` is copied from the
/// [`PaymentRequirements`] that produced it; the verifier rejects the payload
/// if they drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentPayload {
    /// Amount authorized, in the smallest token unit.
    pub amount: TokenAmount,
    /// Address that receives the funds.
    pub recipient: Address,
    /// Address of the signer.
    pub payer: Address,
    /// EIP-155 chain ID resolved from the requirements' network.
    pub chain_id: u64,
    /// Token contract; `None` means the native asset.
    #[serde(
        default,
        deserialize_with = "deserialize_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Address>,
    /// Resource being paid for.
    pub resource: String,
    /// Random value unique per `(payer, resource)`.
    pub nonce: B256,
    /// Last second at which the authorization is valid.
    pub expires_at: UnixTimestamp,
}

impl PaymentPayload {
    /// Builds a payload answering `requirements` with a fresh random nonce.
    ///
    /// When the requirements carry no expiry the payload expires
    /// `default_validity_secs` after `now`.
    #[must_use]
    pub fn for_requirements(
        requirements: &PaymentRequirements,
        payer: Address,
        now: UnixTimestamp,
        default_validity_secs: u64,
    ) -> Self {
        let nonce: [u8; 32] = rng().random();
        Self {
            amount: requirements.amount,
            recipient: requirements.recipient,
            payer,
            chain_id: requirements.network.chain_id(),
            token: normalize_token(requirements.token),
            resource: requirements.resource.clone(),
            nonce: B256::from(nonce),
            expires_at: requirements
                .expires_at
                .unwrap_or(now + default_validity_secs),
        }
    }
}

/// A 65-byte secp256k1 signature laid out as `r ‖ s ‖ v`.
///
/// Serialized as a `0x`-prefixed hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentSignature(pub [u8; 65]);

/// Returned when signature bytes are not exactly 65 long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("signature must be 65 bytes, got {0}")]
pub struct SignatureLengthError(pub usize);

impl PaymentSignature {
    /// Assembles a signature from its components.
    #[must_use]
    pub fn from_parts(r: B256, s: B256, v: u8) -> Self {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(r.as_slice());
        bytes[32..64].copy_from_slice(s.as_slice());
        bytes[64] = v;
        Self(bytes)
    }

    /// Parses a signature from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureLengthError`] if the slice is not 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureLengthError> {
        <[u8; 65]>::try_from(bytes)
            .map(Self)
            .map_err(|_| SignatureLengthError(bytes.len()))
    }

    /// The `r` component.
    #[must_use]
    pub fn r(&self) -> B256 {
        B256::from_slice(&self.0[..32])
    }

    /// The `s` component.
    #[must_use]
    pub fn s(&self) -> B256 {
        B256::from_slice(&self.0[32..64])
    }

    /// The recovery byte as transmitted (`0`, `1`, `27` or `28`).
    #[must_use]
    pub const fn v(&self) -> u8 {
        self.0[64]
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl fmt::Debug for PaymentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentSignature({})", hex::encode_prefixed(self.0))
    }
}

impl fmt::Display for PaymentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_prefixed(self.0))
    }
}

impl From<alloy_primitives::Signature> for PaymentSignature {
    fn from(signature: alloy_primitives::Signature) -> Self {
        Self(signature.as_bytes())
    }
}

impl Serialize for PaymentSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_prefixed(self.0))
    }
}

impl<'de> Deserialize<'de> for PaymentSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| de::Error::custom("signature must be 0x-prefixed hex"))?;
        let bytes = hex::decode(stripped).map_err(de::Error::custom)?;
        Self::from_slice(&bytes).map_err(de::Error::custom)
    }
}

/// A payload together with its signature; the unit sent in `X-Payment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignedPayment {
    /// What was authorized.
    pub payment: PaymentPayload,
    /// Signature over the payload's hash.
    pub signature: PaymentSignature,
}
