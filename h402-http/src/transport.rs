//! The HTTP collaborator the negotiator drives.
//!
//! [`Transport`] is deliberately minimal: send one request, get back status,
//! headers and body. Connection pooling, TLS and redirects are the
//! implementation's business. [`ReqwestTransport`] is the stock
//! implementation.

use async_trait::async_trait;
use http::{Request, Response};

use crate::error::TransportError;

/// Sends a single HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and buffers the full response.
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError> {
        (**self).send(request).await
    }
}

/// [`Transport`] backed by a [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_builder() {
            Self::InvalidRequest(value.to_string())
        } else {
            Self::Connection(value.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError> {
        let request = reqwest::Request::try_from(request)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Copies method, URI, version, headers and body; extensions are dropped.
pub(crate) fn clone_request(request: &Request<Vec<u8>>) -> Request<Vec<u8>> {
    let mut copy = Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}
