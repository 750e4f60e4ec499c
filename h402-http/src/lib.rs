#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP layer for h402 payments.
//!
//! The client side drives the 402 negotiation: send, read
//! `X-Payment-Requirements`, check the budget, sign, retry once with
//! `X-Payment`. The server side is a [`Paygate`](server::Paygate) that
//! verifies incoming payments and turns failures into responses.
//!
//! # Modules
//!
//! - [`constants`] - Header names and status codes
//! - [`error`] - Transport and negotiation errors
//! - [`transport`] - The HTTP collaborator (feature: `client`)
//! - [`client`] - [`Negotiator`](client::Negotiator) and the reqwest
//!   middleware (feature: `client`)
//! - [`server`] - [`Paygate`](server::Paygate) (feature: `server`)
//!
//! # Feature Flags
//!
//! - `client` (default) - Negotiator, `ReqwestTransport`, `PaymentMiddleware`
//! - `server` (default) - Paygate with `axum-core` responses
//! - `telemetry` - `tracing` spans for negotiation and gate checks

pub mod constants;
pub mod error;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub mod transport;

#[cfg(feature = "server")]
pub mod server;
