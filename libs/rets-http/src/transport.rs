//! Default hyper/rustls transport.

use crate::config::{TransportConfig, TransportSecurity};
use crate::error::RetsError;
use crate::response::ResponseBody;
use crate::tls::https_connector;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type Inner = BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, RetsError>;

/// Pooled HTTP/1.1 + h2 client with transparent decompression and a
/// per-attempt timeout.
///
/// Redirects are returned as-is; RETS login flows that redirect expect the
/// caller to follow with the session cookies in place.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Inner,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Build the transport. Performs no network I/O.
    ///
    /// # Errors
    /// Returns `RetsError::Tls` if the TLS root store cannot be set up.
    pub fn new(config: &TransportConfig) -> Result<Self, RetsError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 RETS credentials may travel in clear text"
            );
        }

        let https = https_connector(config.tls_roots, config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // The pool timer drives idle expiry.
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build::<_, Full<Bytes>>(https);

        let timeout = config.request_timeout;
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DecompressionLayer::new())
            .service(client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        Ok(Self {
            inner: BoxCloneSyncService::new(service),
        })
    }
}

impl Service<Request<Full<Bytes>>> for HyperTransport {
    type Response = Response<ResponseBody>;
    type Error = RetsError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        self.inner.call(req)
    }
}

fn map_tower_error(err: tower::BoxError, timeout: Duration) -> RetsError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return RetsError::Timeout(timeout);
    }
    match err.downcast::<hyper_util::client::legacy::Error>() {
        Ok(client_err) => RetsError::from(*client_err),
        Err(other) => match other.downcast::<RetsError>() {
            Ok(rets_err) => *rets_err,
            Err(other) => RetsError::Transport(other),
        },
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}
