#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core protocol engine for HTTP 402 payments.
//!
//! A server that wants to be paid answers with `402 Payment Required` and an
//! `X-Payment-Requirements` header. The client builds a [`PaymentPayload`]
//! from those requirements, signs its EIP-712 hash, and retries with an
//! `X-Payment` header carrying the [`SignedPayment`]. The server verifies the
//! signature, cross-checks every field against what it asked for, and burns
//! the nonce so the same proof cannot be spent twice.
//!
//! Nothing here touches a chain. A signed payment is an off-chain
//! authorization that a separate settlement process may later redeem.
//!
//! # Modules
//!
//! - [`networks`] - Supported networks and their chain IDs
//! - [`amount`] - Token amounts in the smallest unit
//! - [`timestamp`] - Unix timestamps and clocks
//! - [`proto`] - Wire types
//! - [`codec`] - `base64(JSON)` header encoding
//! - [`hash`] - EIP-712 message hash of a payload
//! - [`signer`] - The signing capability clients depend on
//! - [`replay`] - Shared nonce set with periodic eviction
//! - [`verify`] - Server-side verification
//! - [`config`] - Client payment policy
//! - [`error`] - Error classes and reason codes
//!
//! # Feature Flags
//!
//! - `telemetry` (default) - `tracing` spans and events for verification
//!   and eviction
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use alloy_primitives::address;
//! use h402::codec;
//! use h402::networks::Network;
//! use h402::proto::PaymentRequirements;
//! use h402::replay::ReplayGuard;
//! use h402::verify::Verifier;
//!
//! let requirements = PaymentRequirements::new(
//!     1000u64.into(),
//!     address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
//!     Network::BaseSepolia,
//!     "/data",
//! );
//! let header = codec::encode_requirements(&requirements).unwrap();
//! assert_eq!(codec::decode_requirements(&header).unwrap(), requirements);
//!
//! let verifier = Verifier::new(Arc::new(ReplayGuard::new()));
//! # let _ = verifier;
//! ```

pub mod amount;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod networks;
pub mod proto;
pub mod replay;
pub mod signer;
pub mod timestamp;
pub mod verify;

pub use proto::{PaymentPayload, PaymentRequirements, PaymentSignature, SignedPayment};
