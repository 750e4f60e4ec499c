#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! secp256k1 payment signers for h402.
//!
//! Both signers implement [`h402::signer::PaymentSigner`]: they hash the
//! payload with [`h402::hash::hash`] and return a 65-byte signature with a low
//! `s` and `v` in `{27, 28}`.
//!
//! - [`LocalKeySigner`] keeps the private key in memory and signs with RFC 6979
//!   deterministic ECDSA.
//! - [`RemoteSigner`] delegates to a key-management service through the
//!   [`KeyManagementClient`] trait, bounding every call with a timeout.
//!
//! # Feature Flags
//!
//! - `local` (default) - [`LocalKeySigner`]
//! - `remote` (default) - [`RemoteSigner`] and [`KeyManagementClient`]
//! - `telemetry` - `tracing` spans around remote signer calls

#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "remote")]
pub mod remote;

#[cfg(feature = "local")]
pub use local::{KeyLoadError, LocalKeySigner};
#[cfg(feature = "remote")]
pub use remote::{KeyManagementClient, KeyRef, KmsError, RemoteSigner};
