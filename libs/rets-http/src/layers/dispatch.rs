use crate::context::Deadline;
use crate::cookies::CookieStore;
use crate::error::RetsError;
use http::header::COOKIE;
use http::{HeaderValue, Request, Response, Uri};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use url::Url;

/// Parse the request URI as an absolute `http`/`https` URL.
///
/// # Errors
/// Returns `RetsError::InvalidUri` for relative URIs, other schemes or a
/// missing host.
pub fn request_url(uri: &Uri) -> Result<Url, RetsError> {
    let invalid = |reason: String| RetsError::InvalidUri {
        url: uri.to_string(),
        reason,
    };

    let url = Url::parse(&uri.to_string()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(url)
}

/// Innermost RETS layer: cookie handling and deadline enforcement around
/// the transport.
///
/// Attaches the stored cookies for the request URL, submits the request,
/// and records any `Set-Cookie` headers of the response. The [`Deadline`]
/// extension, when present, bounds the transport call.
#[derive(Clone)]
pub struct DispatchLayer {
    cookies: Arc<dyn CookieStore>,
}

impl DispatchLayer {
    #[must_use]
    pub fn new(cookies: Arc<dyn CookieStore>) -> Self {
        Self { cookies }
    }
}

impl<S> Layer<S> for DispatchLayer {
    type Service = DispatchService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DispatchService {
            inner,
            cookies: self.cookies.clone(),
        }
    }
}

/// Service produced by [`DispatchLayer`]
#[derive(Clone)]
pub struct DispatchService<S> {
    inner: S,
    cookies: Arc<dyn CookieStore>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DispatchService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>, Error = RetsError>,
    S::Future: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = RetsError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let url = match request_url(req.uri()) {
            Ok(url) => url,
            Err(e) => return Box::pin(std::future::ready(Err(e))),
        };

        if let Some(stored) = self.cookies.cookies_for(&url) {
            let merged = match req.headers().get(COOKIE) {
                Some(existing) => {
                    let mut joined = existing.as_bytes().to_vec();
                    joined.extend_from_slice(b"; ");
                    joined.extend_from_slice(stored.as_bytes());
                    HeaderValue::from_bytes(&joined).unwrap_or(stored)
                }
                None => stored,
            };
            req.headers_mut().insert(COOKIE, merged);
        }

        let deadline = req.extensions().get::<Deadline>().copied();
        let cookies = self.cookies.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let resp = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.instant(), fut)
                    .await
                    .map_err(|_| RetsError::DeadlineExceeded)??,
                None => fut.await?,
            };
            cookies.store_from_response(&url, resp.headers());
            Ok(resp)
        })
    }
}
