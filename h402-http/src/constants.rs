//! HTTP-specific constants for the h402 protocol.
//!
//! Header names are lowercase so they can be used directly as
//! [`http::HeaderName`] statics; HTTP compares them case-insensitively.

/// Header carrying encoded requirements on a 402 response (server → client).
pub const PAYMENT_REQUIREMENTS_HEADER: &str = "x-payment-requirements";

/// Header carrying the encoded signed payment on the retry (client → server).
pub const PAYMENT_HEADER: &str = "x-payment";

/// CORS header name for exposing custom headers.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "access-control-expose-headers";
