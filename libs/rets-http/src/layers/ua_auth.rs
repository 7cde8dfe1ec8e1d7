use crate::cookies::CookieStore;
use crate::headers::{RETS_REQUEST_ID, RETS_UA_AUTHORIZATION, RETS_VERSION};
use crate::layers::dispatch::request_url;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use md5::{Digest, Md5};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use zeroize::Zeroizing;

/// Inputs of one `RETS-UA-Authorization` computation.
#[derive(Clone, Copy)]
pub struct UaAuthContext<'a> {
    pub user_agent: &'a str,
    pub ua_password: &'a str,
    /// `RETS-Request-ID` of the request, empty when absent
    pub request_id: &'a str,
    /// Server-issued session id, empty before login
    pub session_id: &'a str,
    pub version: &'a str,
}

impl fmt::Debug for UaAuthContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaAuthContext")
            .field("user_agent", &self.user_agent)
            .field("ua_password", &"[REDACTED]")
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .field("version", &self.version)
            .finish()
    }
}

impl UaAuthContext<'_> {
    /// Lower-case hex digest, without the `Digest ` prefix.
    #[must_use]
    pub fn digest(&self) -> String {
        let a1 = ua_a1(self.user_agent, self.ua_password);
        ua_digest_with_a1(&a1, self.request_id, self.session_id, self.version)
    }

    /// Full header value, `Digest <hex>`.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("Digest {}", self.digest())
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn ua_a1(user_agent: &str, ua_password: &str) -> Zeroizing<String> {
    let secret = Zeroizing::new(format!("{user_agent}:{ua_password}"));
    Zeroizing::new(md5_hex(&secret))
}

fn ua_digest_with_a1(a1: &str, request_id: &str, session_id: &str, version: &str) -> String {
    md5_hex(&format!("{a1}:{request_id}:{session_id}:{version}"))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Tower layer that attaches `RETS-UA-Authorization`.
///
/// Without a user-agent password the layer forwards requests untouched.
#[derive(Clone)]
pub struct UaAuthLayer {
    a1: Option<Arc<Zeroizing<String>>>,
    rets_version: Arc<str>,
    cookies: Arc<dyn CookieStore>,
}

impl fmt::Debug for UaAuthLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaAuthLayer")
            .field("enabled", &self.a1.is_some())
            .field("rets_version", &self.rets_version)
            .finish_non_exhaustive()
    }
}

impl UaAuthLayer {
    /// `ua_password` of `None` or `""` disables the digest.
    #[must_use]
    pub fn new(
        user_agent: &str,
        ua_password: Option<&str>,
        rets_version: &str,
        cookies: Arc<dyn CookieStore>,
    ) -> Self {
        let a1 = ua_password
            .filter(|pw| !pw.is_empty())
            .map(|pw| Arc::new(ua_a1(user_agent, pw)));
        Self {
            a1,
            rets_version: Arc::from(rets_version),
            cookies,
        }
    }
}

impl<S> Layer<S> for UaAuthLayer {
    type Service = UaAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UaAuthService {
            inner,
            a1: self.a1.clone(),
            rets_version: self.rets_version.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

/// Service produced by [`UaAuthLayer`]
#[derive(Clone)]
pub struct UaAuthService<S> {
    inner: S,
    a1: Option<Arc<Zeroizing<String>>>,
    rets_version: Arc<str>,
    cookies: Arc<dyn CookieStore>,
}

impl<S> UaAuthService<S> {
    fn digest_for<B>(&self, a1: &str, req: &Request<B>) -> String {
        let headers = req.headers();
        let version = header_str(headers, &RETS_VERSION).unwrap_or(&self.rets_version);
        let request_id = header_str(headers, &RETS_REQUEST_ID).unwrap_or_default();
        let session_id = request_url(req.uri())
            .ok()
            .and_then(|url| self.cookies.session_id(&url))
            .unwrap_or_default();

        tracing::trace!(
            has_session = !session_id.is_empty(),
            has_request_id = !request_id.is_empty(),
            "attaching RETS-UA-Authorization"
        );
        ua_digest_with_a1(a1, request_id, &session_id, version)
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for UaAuthService<S>
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
        let Some(a1) = self.a1.as_deref() else {
            return self.inner.call(req);
        };

        let digest = self.digest_for(a1, &req);
        if let Ok(mut value) = HeaderValue::from_str(&format!("Digest {digest}")) {
            value.set_sensitive(true);
            req.headers_mut().insert(RETS_UA_AUTHORIZATION, value);
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::cookies::MemoryCookieStore;
    use bytes::Bytes;
    use http::header::SET_COOKIE;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;
    use url::Url;

    const D1: &str = "e4548c391006d07dbe71b710ccd2c929";
    const D2: &str = "6ddfcb2ca97d56d68d437f53f89f6608";

    /// Returns the request's UA digest header (if any) as the response body.
    #[derive(Clone)]
    struct CaptureUaAuth;

    impl Service<Request<Full<Bytes>>> for CaptureUaAuth {
        type Response = Response<Full<Bytes>>;
        type Error = std::convert::Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let body = req
                .headers()
                .get(RETS_UA_AUTHORIZATION)
                .map(|v| Bytes::copy_from_slice(v.as_bytes()))
                .unwrap_or_default();
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(body))
                .unwrap()))
        }
    }

    async fn captured(service: &mut UaAuthService<CaptureUaAuth>, req: Request<Full<Bytes>>) -> String {
        use http_body_util::BodyExt;
        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn search_request() -> http::request::Builder {
        Request::builder()
            .method(Method::GET)
            .uri("http://rets.example.com/rets/search")
            .header(RETS_VERSION, "1.8")
    }

    #[test]
    fn digest_known_answers() {
        let ctx = UaAuthContext {
            user_agent: "RETSClient/1.0",
            ua_password: "secret",
            request_id: "",
            session_id: "",
            version: "1.8",
        };
        assert_eq!(ua_a1("RETSClient/1.0", "secret").as_str(), "c5b84ec8ed614e370949566f77c9a3cb");
        assert_eq!(ctx.digest(), D1);
        assert_eq!(ctx.header_value(), format!("Digest {D1}"));

        let ctx = UaAuthContext {
            session_id: "S123",
            ..ctx
        };
        assert_eq!(ctx.digest(), D2);

        let ctx = UaAuthContext {
            request_id: "42",
            ..ctx
        };
        assert_eq!(ctx.digest(), "735ab138cc1cbe901ff6226639ec749b");
    }

    #[test]
    fn digest_changes_with_each_input() {
        let base = UaAuthContext {
            user_agent: "RETSClient/1.0",
            ua_password: "secret",
            request_id: "",
            session_id: "",
            version: "1.8",
        };
        assert_eq!(base.digest(), D1);

        let variants = [
            UaAuthContext {
                user_agent: "RETSClient/1.1",
                ..base
            },
            UaAuthContext {
                ua_password: "secret2",
                ..base
            },
            UaAuthContext {
                request_id: "1",
                ..base
            },
            UaAuthContext {
                session_id: "S1",
                ..base
            },
            UaAuthContext {
                version: "1.7.2",
                ..base
            },
        ];
        let mut seen = std::collections::HashSet::from([D1.to_owned()]);
        for ctx in variants {
            let digest = ctx.digest();
            assert_ne!(digest, D1, "{ctx:?}");
            assert!(seen.insert(digest), "{ctx:?}");
        }
    }

    #[test]
    fn debug_redacts_password() {
        let ctx = UaAuthContext {
            user_agent: "RETSClient/1.0",
            ua_password: "secret",
            request_id: "",
            session_id: "",
            version: "1.8",
        };
        assert!(!format!("{ctx:?}").contains("secret"));
    }

    #[tokio::test]
    async fn digest_tracks_session_cookie() {
        let cookies = Arc::new(MemoryCookieStore::new());
        let layer = UaAuthLayer::new("RETSClient/1.0", Some("secret"), "1.8", cookies.clone());
        let mut service = layer.layer(CaptureUaAuth);

        let first = captured(&mut service, search_request().body(Full::default()).unwrap()).await;
        assert_eq!(first, format!("Digest {D1}"));

        let mut set_cookie = HeaderMap::new();
        set_cookie.insert(SET_COOKIE, HeaderValue::from_static("RETS-Session-ID=S123; Path=/"));
        cookies.store_from_response(
            &Url::parse("http://rets.example.com/rets/login").unwrap(),
            &set_cookie,
        );

        let second = captured(&mut service, search_request().body(Full::default()).unwrap()).await;
        assert_eq!(second, format!("Digest {D2}"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn request_id_header_is_used() {
        let cookies = Arc::new(MemoryCookieStore::new());
        let layer = UaAuthLayer::new("RETSClient/1.0", Some("secret"), "1.8", cookies);
        let mut service = layer.layer(CaptureUaAuth);

        let req = search_request()
            .header(RETS_REQUEST_ID, "42")
            .body(Full::default())
            .unwrap();
        let with_id = captured(&mut service, req).await;

        let expected = UaAuthContext {
            user_agent: "RETSClient/1.0",
            ua_password: "secret",
            request_id: "42",
            session_id: "",
            version: "1.8",
        }
        .header_value();
        assert_eq!(with_id, expected);
    }

    #[tokio::test]
    async fn configured_version_is_fallback() {
        let cookies = Arc::new(MemoryCookieStore::new());
        let layer = UaAuthLayer::new("RETSClient/1.0", Some("secret"), "1.8", cookies);
        let mut service = layer.layer(CaptureUaAuth);

        let req = Request::get("http://rets.example.com/rets/search")
            .body(Full::default())
            .unwrap();
        assert_eq!(captured(&mut service, req).await, format!("Digest {D1}"));
    }

    #[tokio::test]
    async fn passthrough_without_ua_password() {
        for password in [None, Some("")] {
            let cookies = Arc::new(MemoryCookieStore::new());
            let layer = UaAuthLayer::new("RETSClient/1.0", password, "1.8", cookies);
            let mut service = layer.layer(CaptureUaAuth);

            let req = search_request().body(Full::default()).unwrap();
            assert_eq!(captured(&mut service, req).await, "");
        }
    }
}
