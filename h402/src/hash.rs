//! Canonical message hash of a [`PaymentPayload`].
//!
//! The digest is an EIP-712 typed-data hash, so wallets that speak
//! `eth_signTypedData_v4` can produce the same signature as
//! [`PaymentSigner`](crate::signer::PaymentSigner) implementations.
//!
//! Domain: `{ name: "h402", version: "1", chainId: payload.chainId }`.
//!
//! Struct, in this field order:
//!
//! ```text
//! PaymentAuthorization(uint256 amount,address recipient,address payer,address token,string resource,bytes32 nonce,uint64 expiresAt)
//! ```
//!
//! A payment in the native asset encodes `token` as the zero address.

use alloy_primitives::{Address, B256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

use crate::proto::PaymentPayload;

/// EIP-712 domain name.
pub const DOMAIN_NAME: &str = "h402";

/// EIP-712 domain version.
pub const DOMAIN_VERSION: &str = "1";

sol!(
    /// EIP-712 struct signed by the payer.
    #[derive(Debug, PartialEq, Eq)]
    struct PaymentAuthorization {
        uint256 amount;
        address recipient;
        address payer;
        address token;
        string resource;
        bytes32 nonce;
        uint64 expiresAt;
    }
);

/// The domain separator inputs for a chain.
#[must_use]
pub fn domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: DOMAIN_NAME,
        version: DOMAIN_VERSION,
        chain_id: chain_id,
    }
}

impl From<&PaymentPayload> for PaymentAuthorization {
    fn from(payload: &PaymentPayload) -> Self {
        Self {
            amount: payload.amount.as_u256(),
            recipient: payload.recipient,
            payer: payload.payer,
            token: payload.token.unwrap_or(Address::ZERO),
            resource: payload.resource.clone(),
            nonce: payload.nonce,
            expiresAt: payload.expires_at.as_secs(),
        }
    }
}

/// Computes the 32-byte digest that gets signed.
#[must_use]
pub fn hash(payload: &PaymentPayload) -> B256 {
    PaymentAuthorization::from(payload).eip712_signing_hash(&domain(payload.chain_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use alloy_primitives::{U256, address, keccak256};

    fn payload() -> PaymentPayload {
        PaymentPayload {
            amount: 1000u64.into(),
            recipient: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            payer: address!("0x857b06519E91e3A54538791bDbb0E22373e36b66"),
            chain_id: 84532,
            token: None,
            resource: "/data".into(),
            nonce: B256::repeat_byte(0xab),
            expires_at: UnixTimestamp::from_secs(1_700_000_300),
        }
    }

    #[test]
    fn test_type_string() {
        assert_eq!(
            PaymentAuthorization::eip712_encode_type(),
            "PaymentAuthorization(uint256 amount,address recipient,address payer,address token,string resource,bytes32 nonce,uint64 expiresAt)"
        );
        assert_eq!(
            PaymentAuthorization::eip712_type_hash(&PaymentAuthorization::from(&payload())),
            keccak256(PaymentAuthorization::eip712_encode_type().as_bytes())
        );
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(hash(&payload()), hash(&payload()));
    }

    #[test]
    fn test_native_asset_is_zero_address() {
        let native = payload();
        let mut zero = payload();
        zero.token = Some(Address::ZERO);
        assert_eq!(hash(&native), hash(&zero));
    }

    #[test]
    fn test_every_field_changes_the_hash() {
        let base = hash(&payload());
        let variants: Vec<Box<dyn Fn(&mut PaymentPayload)>> = vec![
            Box::new(|p| p.amount = U256::from(1001u64).into()),
            Box::new(|p| p.recipient = Address::repeat_byte(1)),
            Box::new(|p| p.payer = Address::repeat_byte(2)),
            Box::new(|p| p.chain_id = 8453),
            Box::new(|p| p.token = Some(Address::repeat_byte(3))),
            Box::new(|p| p.resource = "/data2".into()),
            Box::new(|p| p.nonce = B256::repeat_byte(0xac)),
            Box::new(|p| p.expires_at = UnixTimestamp::from_secs(1_700_000_301)),
        ];
        for (i, mutate) in variants.iter().enumerate() {
            let mut changed = payload();
            mutate(&mut changed);
            assert_ne!(hash(&changed), base, "field {i} did not affect the hash");
        }
    }

    #[test]
    fn test_domain_is_chain_bound() {
        assert_ne!(domain(1).separator(), domain(8453).separator());
        assert_eq!(domain(10).chain_id, Some(U256::from(10u64)));
    }
}
