//! Server-side payment gate.
//!
//! [`Paygate`] guards one priced resource. It reads `X-Payment`, runs the
//! shared [`Verifier`], and turns every failure into a response:
//!
//! | failure                          | status | body `error`         |
//! |----------------------------------|--------|----------------------|
//! | no `X-Payment`                   | 402    | `payment_required`   |
//! | undecodable `X-Payment`          | 400    | `invalid_format`     |
//! | nonce already used               | 409    | `replayed_nonce`     |
//! | any other verification failure   | 402    | the reason code      |
//!
//! Every 402 carries freshly issued `X-Payment-Requirements`.

use alloy_primitives::Address;
use axum_core::body::Body;
use axum_core::response::{IntoResponse, Response};
use h402::codec::{self, CodecError};
use h402::error::{Classify, ErrorClass, ErrorReason};
use h402::proto::PaymentRequirements;
use h402::verify::{Verifier, VerifyError};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{ACCESS_CONTROL_EXPOSE_HEADERS, PAYMENT_HEADER, PAYMENT_REQUIREMENTS_HEADER};

/// Why a request was not let through.
#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    /// The request carried no payment.
    #[error("{PAYMENT_HEADER} header is required")]
    PaymentRequired,
    /// The payment header could not be decoded.
    #[error(transparent)]
    Malformed(CodecError),
    /// The payment failed verification.
    #[error(transparent)]
    Rejected(#[from] VerifyError),
}

impl PaygateError {
    /// HTTP status for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(VerifyError::ReplayedNonce) => StatusCode::CONFLICT,
            Self::PaymentRequired | Self::Rejected(_) => StatusCode::PAYMENT_REQUIRED,
        }
    }

    /// Reason code for the response body.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            Self::PaymentRequired => ErrorReason::PaymentRequired,
            Self::Malformed(_) => ErrorReason::InvalidFormat,
            Self::Rejected(e) => e.reason(),
        }
    }
}

impl Classify for PaygateError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::PaymentRequired => ErrorClass::Policy,
            Self::Malformed(e) => e.class(),
            Self::Rejected(e) => e.class(),
        }
    }
}

/// A rejection ready to be sent to the client.
#[derive(Debug)]
pub struct PaymentRejection {
    status: StatusCode,
    reason: ErrorReason,
    details: String,
    requirements: Option<HeaderValue>,
}

impl PaymentRejection {
    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason code.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        self.reason
    }

    /// Encoded requirements attached to a 402, if any.
    #[must_use]
    pub const fn requirements_header(&self) -> Option<&HeaderValue> {
        self.requirements.as_ref()
    }

    /// JSON body: `{"error": <reason>, "details": <message>}`.
    #[must_use]
    pub fn body(&self) -> String {
        json!({
            "error": self.reason.as_str(),
            "details": self.details,
        })
        .to_string()
    }
}

impl IntoResponse for PaymentRejection {
    fn into_response(self) -> Response {
        let mut response = Body::from(self.body()).into_response();
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(requirements) = self.requirements {
            headers.insert(PAYMENT_REQUIREMENTS_HEADER, requirements);
            headers.insert(
                ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static(PAYMENT_REQUIREMENTS_HEADER),
            );
        }
        response
    }
}

/// Guards one priced resource.
#[derive(Debug, Clone)]
pub struct Paygate {
    verifier: Verifier,
    requirements: PaymentRequirements,
    validity_secs: Option<u64>,
}

impl Paygate {
    /// Creates a gate charging `requirements`, verified by `verifier`.
    #[must_use]
    pub const fn new(verifier: Verifier, requirements: PaymentRequirements) -> Self {
        Self {
            verifier,
            requirements,
            validity_secs: None,
        }
    }

    /// Stamps every issued requirement with `expires_at = now + secs`.
    #[must_use]
    pub const fn with_validity_secs(mut self, secs: u64) -> Self {
        self.validity_secs = Some(secs);
        self
    }

    /// The verifier in use.
    #[must_use]
    pub const fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Requirements as they would be issued right now.
    #[must_use]
    pub fn current_requirements(&self) -> PaymentRequirements {
        let mut requirements = self.requirements.clone();
        if let Some(secs) = self.validity_secs {
            requirements.expires_at = Some(self.verifier.clock().now() + secs);
        }
        requirements
    }

    /// Verifies the payment in `headers` and returns the payer.
    ///
    /// # Errors
    ///
    /// A [`PaygateError`] describing the first failure.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.paygate.check", skip_all, err)
    )]
    pub fn check(&self, headers: &HeaderMap) -> Result<Address, PaygateError> {
        let header = headers
            .get(PAYMENT_HEADER)
            .ok_or(PaygateError::PaymentRequired)?;
        let header = header
            .to_str()
            .map_err(|e| PaygateError::Malformed(CodecError::MalformedPayment(e.to_string())))?;
        let signed = codec::decode_payment(header).map_err(PaygateError::Malformed)?;
        Ok(self.verifier.verify(&signed, &self.current_requirements())?)
    }

    /// Builds the response for `err`.
    #[must_use]
    pub fn rejection(&self, err: &PaygateError) -> PaymentRejection {
        let requirements = (err.status() == StatusCode::PAYMENT_REQUIRED)
            .then(|| codec::encode_requirements(&self.current_requirements()).ok())
            .flatten()
            .and_then(|encoded| HeaderValue::try_from(encoded).ok());
        PaymentRejection {
            status: err.status(),
            reason: err.reason(),
            details: err.to_string(),
            requirements,
        }
    }

    /// [`check`](Self::check) with failures already turned into responses.
    ///
    /// # Errors
    ///
    /// A [`PaymentRejection`] that implements [`IntoResponse`].
    pub fn authorize(&self, headers: &HeaderMap) -> Result<Address, PaymentRejection> {
        self.check(headers).map_err(|err| self.rejection(&err))
    }

    /// The bare 402 response advertising the current requirements.
    #[must_use]
    pub fn payment_required(&self) -> Response {
        self.rejection(&PaygateError::PaymentRequired).into_response()
    }
}
