//! Automatic 402 handling as a `reqwest-middleware` layer.

use h402::config::NegotiatorConfig;
use h402::signer::PaymentSigner;
use h402::timestamp::{Clock, SystemClock};
use http::{Extensions, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "telemetry")]
use tracing::{info, instrument, trace};

use super::{PaymentDecision, prepare_payment, rejection_reason};
use crate::constants::PAYMENT_HEADER;
use crate::error::{NegotiationError, TransportError};

/// Pays for 402 responses on any `reqwest_middleware` client.
///
/// Applies the same policy as [`Negotiator`](super::Negotiator): budget
/// checked before signing, exactly one paid retry, and a second 402 reported
/// as [`NegotiationError::PaymentRejected`]. With `auto_pay` off the 402
/// response is passed through untouched.
///
/// Requests with streaming bodies cannot be cloned and therefore cannot be
/// retried.
pub struct PaymentMiddleware<S> {
    signer: S,
    config: NegotiatorConfig,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for PaymentMiddleware<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentMiddleware")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> PaymentMiddleware<S> {
    /// Creates the middleware.
    #[must_use]
    pub fn new(signer: S, config: NegotiatorConfig) -> Self {
        Self {
            signer,
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
}

fn middleware_error(err: impl Into<NegotiationError>) -> rqm::Error {
    let err: NegotiationError = err.into();
    rqm::Error::Middleware(err.into())
}

/// Runs the next middleware or the HTTP client under the per-call timeout.
#[cfg_attr(
    feature = "telemetry",
    instrument(name = "h402.reqwest.next", skip_all)
)]
async fn run_next(
    next: rqm::Next<'_>,
    req: Request,
    extensions: &mut Extensions,
    timeout: Duration,
) -> rqm::Result<Response> {
    tokio::time::timeout(timeout, next.run(req, extensions))
        .await
        .map_err(|_| middleware_error(TransportError::Timeout(timeout)))?
}

#[async_trait::async_trait]
impl<S> rqm::Middleware for PaymentMiddleware<S>
where
    S: PaymentSigner + 'static,
{
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.reqwest.handle", skip_all, err)
    )]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let timeout = self.config.request_timeout();
        let retry_req = req.try_clone();
        let res = run_next(next.clone(), req, extensions, timeout).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            #[cfg(feature = "telemetry")]
            trace!(status = ?res.status(), "no payment required");
            return Ok(res);
        }

        #[cfg(feature = "telemetry")]
        info!(url = %res.url(), "received 402 Payment Required");

        let decision = prepare_payment(&self.signer, &self.config, res.headers(), self.clock.now())
            .await
            .map_err(middleware_error)?;
        let header = match decision {
            PaymentDecision::Manual(_) => return Ok(res),
            PaymentDecision::Pay { header, .. } => header,
        };

        let mut retry = retry_req.ok_or_else(|| {
            middleware_error(TransportError::InvalidRequest(
                "request body cannot be cloned for the paid retry".into(),
            ))
        })?;
        retry.headers_mut().insert(PAYMENT_HEADER, header);

        #[cfg(feature = "telemetry")]
        trace!(url = %retry.url(), "retrying with payment");

        let res = run_next(next, retry, extensions, timeout).await?;
        if res.status() == StatusCode::PAYMENT_REQUIRED {
            let status = res.status();
            let body = res
                .bytes()
                .await
                .map_err(|e| middleware_error(TransportError::Connection(e.to_string())))?;
            return Err(middleware_error(NegotiationError::PaymentRejected {
                reason: rejection_reason(status, &body),
            }));
        }
        Ok(res)
    }
}

/// Adds [`PaymentMiddleware`] to a plain reqwest client.
pub trait ReqwestWithPayments {
    /// Wraps the client with `middleware`.
    fn with_payments<S>(self, middleware: PaymentMiddleware<S>) -> rqm::ClientBuilder
    where
        S: PaymentSigner + 'static;
}

impl ReqwestWithPayments for reqwest::Client {
    fn with_payments<S>(self, middleware: PaymentMiddleware<S>) -> rqm::ClientBuilder
    where
        S: PaymentSigner + 'static,
    {
        rqm::ClientBuilder::new(self).with(middleware)
    }
}
