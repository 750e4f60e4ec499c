//! Client-side 402 negotiation.
//!
//! [`Negotiator`] drives one request through the payment flow:
//!
//! ```text
//! Initial ──send──▶ Sent ──2xx/4xx/5xx──▶ Completed
//!                    │
//!                    └──402──▶ PaymentRequired ──auto_pay off──▶ (returned to caller)
//!                                   │
//!                                   ├──amount > max_amount──▶ Failed(BudgetExceeded)
//!                                   │
//!                                   └──sign, retry once──▶ Completed | Failed
//! ```
//!
//! The same decision step, [`prepare_payment`], backs the reqwest
//! [`PaymentMiddleware`], so both paths apply identical policy.

mod middleware;

pub use middleware::*;

use alloy_primitives::Address;
use h402::codec;
use h402::config::NegotiatorConfig;
use h402::proto::{PaymentPayload, PaymentRequirements, SignedPayment};
use h402::signer::{PaymentSigner, SignerError};
use h402::timestamp::{Clock, SystemClock, UnixTimestamp};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "telemetry")]
use tracing::{debug, info, instrument, trace};

use crate::constants::{PAYMENT_HEADER, PAYMENT_REQUIREMENTS_HEADER};
use crate::error::{NegotiationError, TransportError};
use crate::transport::{Transport, clone_request};

/// Observable phase of a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Nothing sent yet.
    Initial,
    /// The first request is in flight.
    Sent,
    /// The server answered 402.
    PaymentRequired,
    /// A non-402 response was received.
    Completed,
    /// The negotiation ended with an error.
    Failed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Sent => "sent",
            Self::PaymentRequired => "payment_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a successful negotiation ended.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// The server returned a non-402 response.
    Completed {
        /// Final response.
        response: Response<Vec<u8>>,
        /// The payment that was attached, if one was needed.
        payment: Option<SignedPayment>,
    },
    /// Payment is required and `auto_pay` is off; nothing was signed.
    PaymentRequired {
        /// Decoded requirements, for the caller to approve or decline.
        requirements: PaymentRequirements,
        /// The 402 response as received.
        response: Response<Vec<u8>>,
    },
}

impl NegotiationOutcome {
    /// The state this outcome corresponds to.
    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        match self {
            Self::Completed { .. } => NegotiationState::Completed,
            Self::PaymentRequired { .. } => NegotiationState::PaymentRequired,
        }
    }

    /// The HTTP response either way.
    #[must_use]
    pub const fn response(&self) -> &Response<Vec<u8>> {
        match self {
            Self::Completed { response, .. } | Self::PaymentRequired { response, .. } => response,
        }
    }
}

/// Result of inspecting a 402 response.
#[derive(Debug)]
pub enum PaymentDecision {
    /// Attach `header` as `X-Payment` and retry.
    Pay {
        /// Encoded signed payment.
        header: HeaderValue,
        /// The payment it encodes.
        payment: SignedPayment,
    },
    /// `auto_pay` is off; hand the requirements to the caller.
    Manual(PaymentRequirements),
}

/// Reads and decodes `X-Payment-Requirements` from a 402 response.
///
/// # Errors
///
/// [`NegotiationError::MissingRequirements`] if the header is absent, or a
/// codec error if it cannot be decoded.
pub fn read_requirements(headers: &HeaderMap) -> Result<PaymentRequirements, NegotiationError> {
    let value = headers
        .get(PAYMENT_REQUIREMENTS_HEADER)
        .ok_or(NegotiationError::MissingRequirements)?;
    let value = value.to_str().map_err(|e| {
        NegotiationError::Codec(codec::CodecError::MalformedRequirements(e.to_string()))
    })?;
    Ok(codec::decode_requirements(value)?)
}

/// Builds a payload for `requirements` with a fresh nonce and signs it.
///
/// Each signer call is bounded by `config.request_timeout()`; the payload
/// lifetime defaults to `config.default_validity_secs`.
///
/// # Errors
///
/// Propagates signer failures. A signer that does not answer in time is
/// [`SignerError::Unavailable`].
pub async fn sign_requirements<S: PaymentSigner>(
    signer: &S,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
    config: &NegotiatorConfig,
) -> Result<SignedPayment, NegotiationError> {
    let timeout = config.request_timeout();
    let payer: Address = bounded(timeout, signer.address()).await?;
    let payment =
        PaymentPayload::for_requirements(requirements, payer, now, config.default_validity_secs);
    let signature = bounded(timeout, signer.sign_payment(&payment)).await?;
    Ok(SignedPayment { payment, signature })
}

async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, SignerError>>,
) -> Result<T, SignerError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| SignerError::Unavailable(format!("signer timed out after {timeout:?}")))?
}

/// Decides what to do with a 402 response.
///
/// With `auto_pay` off the decoded requirements are returned untouched.
/// Otherwise the budget is checked before the signer is consulted, then a
/// payment is signed and encoded.
///
/// # Errors
///
/// [`NegotiationError::BudgetExceeded`] when the amount is above
/// `max_amount`, plus header, signer and codec failures.
pub async fn prepare_payment<S: PaymentSigner>(
    signer: &S,
    config: &NegotiatorConfig,
    headers: &HeaderMap,
    now: UnixTimestamp,
) -> Result<PaymentDecision, NegotiationError> {
    let requirements = read_requirements(headers)?;
    if !config.auto_pay {
        #[cfg(feature = "telemetry")]
        debug!(amount = %requirements.amount, "auto-pay disabled, returning requirements");
        return Ok(PaymentDecision::Manual(requirements));
    }
    check_budget(config, &requirements)?;
    let (header, payment) = encode_payment(signer, &requirements, now, config).await?;
    Ok(PaymentDecision::Pay { header, payment })
}

fn check_budget(
    config: &NegotiatorConfig,
    requirements: &PaymentRequirements,
) -> Result<(), NegotiationError> {
    if let Some(max_amount) = config.max_amount
        && requirements.amount > max_amount
    {
        #[cfg(feature = "telemetry")]
        info!(amount = %requirements.amount, %max_amount, "payment over budget");
        return Err(NegotiationError::BudgetExceeded {
            amount: requirements.amount,
            max_amount,
        });
    }
    Ok(())
}

async fn encode_payment<S: PaymentSigner>(
    signer: &S,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
    config: &NegotiatorConfig,
) -> Result<(HeaderValue, SignedPayment), NegotiationError> {
    let payment = sign_requirements(signer, requirements, now, config).await?;
    let encoded = codec::encode_payment(&payment)?;
    let header = HeaderValue::try_from(encoded).map_err(|e| {
        NegotiationError::Transport(TransportError::InvalidRequest(e.to_string()))
    })?;
    Ok((header, payment))
}

/// Extracts the server's reason from a rejected retry body.
fn rejection_reason(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| status.to_string())
}

/// Internal phases carrying the data each transition needs.
enum Phase {
    Initial(Request<Vec<u8>>),
    Sent(Request<Vec<u8>>, Response<Vec<u8>>),
    PaymentRequired(Request<Vec<u8>>, Response<Vec<u8>>),
    Completed(Response<Vec<u8>>, Option<SignedPayment>),
    Failed(NegotiationError),
}

impl Phase {
    #[cfg(feature = "telemetry")]
    const fn state(&self) -> NegotiationState {
        match self {
            Self::Initial(_) => NegotiationState::Initial,
            Self::Sent(..) => NegotiationState::Sent,
            Self::PaymentRequired(..) => NegotiationState::PaymentRequired,
            Self::Completed(..) => NegotiationState::Completed,
            Self::Failed(_) => NegotiationState::Failed,
        }
    }
}

/// Sends requests and pays for them when the server answers 402.
///
/// A negotiator owns no mutable state, so one instance can drive any number
/// of concurrent requests.
pub struct Negotiator<S, T> {
    signer: S,
    transport: T,
    config: NegotiatorConfig,
    clock: Arc<dyn Clock>,
}

impl<S, T> fmt::Debug for Negotiator<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, T> Negotiator<S, T>
where
    S: PaymentSigner,
    T: Transport,
{
    /// Creates a negotiator with the given policy.
    #[must_use]
    pub fn new(signer: S, transport: T, config: NegotiatorConfig) -> Self {
        Self {
            signer,
            transport,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used to stamp payload expiries.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The active policy.
    #[must_use]
    pub const fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    /// The signer.
    #[must_use]
    pub const fn signer(&self) -> &S {
        &self.signer
    }

    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError> {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    /// Sends `request`, paying at most once if the server asks for it.
    ///
    /// # Errors
    ///
    /// Any [`NegotiationError`]; a second 402 after paying is
    /// [`NegotiationError::PaymentRejected`].
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.negotiate", skip_all, fields(uri = %request.uri()), err)
    )]
    pub async fn execute(
        &self,
        request: Request<Vec<u8>>,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        let mut phase = Phase::Initial(request);
        loop {
            #[cfg(feature = "telemetry")]
            trace!(state = %phase.state(), "negotiation step");
            phase = match phase {
                Phase::Initial(request) => {
                    let retry = clone_request(&request);
                    match self.send(request).await {
                        Ok(response) => Phase::Sent(retry, response),
                        Err(e) => Phase::Failed(e.into()),
                    }
                }
                Phase::Sent(retry, response) => {
                    if response.status() == StatusCode::PAYMENT_REQUIRED {
                        Phase::PaymentRequired(retry, response)
                    } else {
                        Phase::Completed(response, None)
                    }
                }
                Phase::PaymentRequired(retry, response) => {
                    let decision = prepare_payment(
                        &self.signer,
                        &self.config,
                        response.headers(),
                        self.clock.now(),
                    )
                    .await;
                    match decision {
                        Ok(PaymentDecision::Manual(requirements)) => {
                            return Ok(NegotiationOutcome::PaymentRequired {
                                requirements,
                                response,
                            });
                        }
                        Ok(PaymentDecision::Pay { header, payment }) => {
                            match self.retry_with_payment(retry, header).await {
                                Ok(response) => Phase::Completed(response, Some(payment)),
                                Err(e) => Phase::Failed(e),
                            }
                        }
                        Err(e) => Phase::Failed(e),
                    }
                }
                Phase::Completed(response, payment) => {
                    #[cfg(feature = "telemetry")]
                    debug!(status = %response.status(), paid = payment.is_some(), "negotiation completed");
                    return Ok(NegotiationOutcome::Completed { response, payment });
                }
                Phase::Failed(e) => return Err(e),
            };
        }
    }

    /// Pays `requirements` for `request` after a manual approval.
    ///
    /// The budget cap is not applied; the caller already decided to pay.
    ///
    /// # Errors
    ///
    /// Signer, codec and transport failures, or
    /// [`NegotiationError::PaymentRejected`] on a second 402.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.negotiate.pay", skip_all, fields(uri = %request.uri()), err)
    )]
    pub async fn pay(
        &self,
        request: Request<Vec<u8>>,
        requirements: &PaymentRequirements,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        let (header, payment) =
            encode_payment(&self.signer, requirements, self.clock.now(), &self.config).await?;
        let response = self.retry_with_payment(request, header).await?;
        Ok(NegotiationOutcome::Completed {
            response,
            payment: Some(payment),
        })
    }

    async fn retry_with_payment(
        &self,
        mut request: Request<Vec<u8>>,
        header: HeaderValue,
    ) -> Result<Response<Vec<u8>>, NegotiationError> {
        request.headers_mut().insert(PAYMENT_HEADER, header);
        #[cfg(feature = "telemetry")]
        trace!(uri = %request.uri(), "retrying with payment");
        let response = self.send(request).await?;
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(NegotiationError::PaymentRejected {
                reason: rejection_reason(response.status(), response.body()),
            });
        }
        Ok(response)
    }
}
