use crate::config::ACCEPT_ANY;
use crate::error::RetsError;
use crate::headers::RETS_VERSION;
use http::header::{ACCEPT, USER_AGENT};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that stamps the static RETS headers on every request.
///
/// `User-Agent`, `RETS-Version` and `Accept` are always overwritten: the UA
/// digest binds the user agent and version, so a caller-supplied value that
/// differs from the configured one would break server-side verification.
#[derive(Clone, Debug)]
pub struct HeaderDefaultsLayer {
    user_agent: HeaderValue,
    rets_version: HeaderValue,
}

impl HeaderDefaultsLayer {
    /// # Errors
    /// Returns `RetsError::InvalidHeaderValue` if either value is not a
    /// legal header value
    pub fn try_new(
        user_agent: impl AsRef<str>,
        rets_version: impl AsRef<str>,
    ) -> Result<Self, RetsError> {
        Ok(Self {
            user_agent: HeaderValue::from_str(user_agent.as_ref())?,
            rets_version: HeaderValue::from_str(rets_version.as_ref())?,
        })
    }
}

impl<S> Layer<S> for HeaderDefaultsLayer {
    type Service = HeaderDefaultsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HeaderDefaultsService {
            inner,
            user_agent: self.user_agent.clone(),
            rets_version: self.rets_version.clone(),
        }
    }
}

/// Service produced by [`HeaderDefaultsLayer`]
#[derive(Clone, Debug)]
pub struct HeaderDefaultsService<S> {
    inner: S,
    user_agent: HeaderValue,
    rets_version: HeaderValue,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HeaderDefaultsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(RETS_VERSION, self.rets_version.clone());
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_ANY));
        self.inner.call(req)
    }
}
