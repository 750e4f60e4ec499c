//! Header codec: `base64(JSON)`.
//!
//! Requirements travel in `X-Payment-Requirements`, signed payments in
//! `X-Payment`. Both are the standard-alphabet, padded base64 encoding of the
//! compact JSON form of the value. Field order follows struct declaration
//! order, so encoding the same value always yields the same bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::proto::{PaymentRequirements, SignedPayment};

/// Errors raised while encoding or decoding header values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// `X-Payment-Requirements` could not be decoded.
    #[error("Malformed payment requirements: {0}")]
    MalformedRequirements(String),
    /// `X-Payment` could not be decoded.
    #[error("Malformed payment: {0}")]
    MalformedPayment(String),
    /// A value could not be serialized.
    #[error("Failed to serialize header value: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

fn decode<T: DeserializeOwned>(input: &str) -> Result<T, String> {
    let bytes = STANDARD.decode(input.trim()).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// Encodes requirements for the `X-Payment-Requirements` header.
///
/// # Errors
///
/// Returns [`CodecError::Serialize`] if JSON serialization fails.
pub fn encode_requirements(requirements: &PaymentRequirements) -> Result<String, CodecError> {
    encode(requirements)
}

/// Decodes an `X-Payment-Requirements` header value.
///
/// # Errors
///
/// Returns [`CodecError::MalformedRequirements`] on bad base64, bad JSON, a
/// missing field, an unknown field, an unknown network, or an amount that is
/// negative or not a base-10 integer.
pub fn decode_requirements(input: &str) -> Result<PaymentRequirements, CodecError> {
    decode(input).map_err(CodecError::MalformedRequirements)
}

/// Encodes a signed payment for the `X-Payment` header.
///
/// # Errors
///
/// Returns [`CodecError::Serialize`] if JSON serialization fails.
pub fn encode_payment(payment: &SignedPayment) -> Result<String, CodecError> {
    encode(payment)
}

/// Decodes an `X-Payment` header value.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayment`] on any decoding failure.
pub fn decode_payment(input: &str) -> Result<SignedPayment, CodecError> {
    decode(input).map_err(CodecError::MalformedPayment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::Network;
    use crate::proto::{PaymentPayload, PaymentSignature};
    use crate::timestamp::UnixTimestamp;
    use alloy_primitives::{B256, address};

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::new(
            1000u64.into(),
            address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            Network::BaseSepolia,
            "/data",
        )
        .with_description("weather data")
        .with_expires_at(UnixTimestamp::from_secs(1_700_000_300))
    }

    fn signed() -> SignedPayment {
        let payment = PaymentPayload {
            amount: 1000u64.into(),
            recipient: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            payer: address!("0x857b06519E91e3A54538791bDbb0E22373e36b66"),
            chain_id: 84532,
            token: Some(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
            resource: "/data".into(),
            nonce: B256::repeat_byte(7),
            expires_at: UnixTimestamp::from_secs(1_700_000_300),
        };
        SignedPayment {
            payment,
            signature: PaymentSignature::from_parts(B256::repeat_byte(1), B256::repeat_byte(2), 28),
        }
    }

    fn b64_json(value: &serde_json::Value) -> String {
        STANDARD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_requirements_round_trip() {
        let original = requirements();
        let encoded = encode_requirements(&original).unwrap();
        assert_eq!(decode_requirements(&encoded).unwrap(), original);
    }

    #[test]
    fn test_payment_round_trip() {
        let original = signed();
        let encoded = encode_payment(&original).unwrap();
        assert_eq!(decode_payment(&encoded).unwrap(), original);
    }

    #[test]
    fn test_encoding_is_byte_stable() {
        let a = encode_payment(&signed()).unwrap();
        let b = encode_payment(&signed()).unwrap();
        assert_eq!(a, b);

        let json = String::from_utf8(STANDARD.decode(encode_requirements(&requirements()).unwrap()).unwrap())
            .unwrap();
        assert_eq!(
            json,
            r#"{"amount":"1000","recipient":"0x209693Bc6afc0C5328bA36FaF03C514EF312287C","network":"base-sepolia","resource":"/data","description":"weather data","expiresAt":1700000300}"#
        );
    }

    #[test]
    fn test_malformed_requirements() {
        let missing_amount = serde_json::json!({
            "recipient": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "network": "base",
            "resource": "/x",
        });
        let negative = serde_json::json!({
            "amount": "-1",
            "recipient": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "network": "base",
            "resource": "/x",
        });
        let non_numeric = serde_json::json!({
            "amount": "ten",
            "recipient": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "network": "base",
            "resource": "/x",
        });
        let unknown_network = serde_json::json!({
            "amount": "10",
            "recipient": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "network": "dogechain",
            "resource": "/x",
        });
        for value in [missing_amount, negative, non_numeric, unknown_network] {
            let err = decode_requirements(&b64_json(&value)).unwrap_err();
            assert!(matches!(err, CodecError::MalformedRequirements(_)), "{value}");
        }
        assert!(matches!(
            decode_requirements("not base64!"),
            Err(CodecError::MalformedRequirements(_))
        ));
    }

    #[test]
    fn test_malformed_payment() {
        assert!(matches!(
            decode_payment(&STANDARD.encode(b"{}")),
            Err(CodecError::MalformedPayment(_))
        ));
        let mut value = serde_json::to_value(signed()).unwrap();
        value["signature"] = serde_json::json!("0xdeadbeef");
        assert!(matches!(
            decode_payment(&b64_json(&value)),
            Err(CodecError::MalformedPayment(_))
        ));
    }
}
