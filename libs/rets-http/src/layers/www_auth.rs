use crate::challenge::{new_cnonce, parse_challenges, respond};
use bytes::Bytes;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, request};
use http_body_util::Full;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};

#[derive(Clone)]
struct Credentials {
    username: Arc<str>,
    password: Arc<SecretString>,
}

impl Credentials {
    /// `Authorization` value for the challenges in `headers`, if any of them
    /// can be answered.
    fn answer(&self, parts: &request::Parts, headers: &HeaderMap) -> Option<HeaderValue> {
        if self.username.is_empty() {
            tracing::debug!("401 received but no credentials configured");
            return None;
        }

        let challenges: Vec<_> = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_challenges)
            .flatten()
            .collect();
        if challenges.is_empty() {
            tracing::debug!("401 without a usable WWW-Authenticate challenge");
            return None;
        }

        let uri = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let Some(authorization) = respond(
            &challenges,
            &self.username,
            self.password.expose_secret(),
            parts.method.as_str(),
            uri,
            &new_cnonce(),
        ) else {
            tracing::debug!(
                count = challenges.len(),
                "no supported WWW-Authenticate challenge"
            );
            return None;
        };

        let mut value = HeaderValue::from_str(&authorization).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

/// Tower layer answering one `WWW-Authenticate` challenge.
///
/// A `401` carrying a `Basic` or `Digest` challenge is answered by
/// resending the request once with `Authorization`. Whatever that retry
/// returns is final, including another `401`. Unusable challenges leave
/// the original `401` untouched.
///
/// Nothing is cached between requests: every request starts unauthenticated.
#[derive(Clone)]
pub struct WwwAuthLayer {
    credentials: Credentials,
}

impl fmt::Debug for WwwAuthLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WwwAuthLayer")
            .field("username", &self.credentials.username)
            .finish_non_exhaustive()
    }
}

impl WwwAuthLayer {
    /// An empty `username` disables challenge handling.
    #[must_use]
    pub fn new(username: &str, password: SecretString) -> Self {
        Self {
            credentials: Credentials {
                username: Arc::from(username),
                password: Arc::new(password),
            },
        }
    }
}

impl<S> Layer<S> for WwwAuthLayer {
    type Service = WwwAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WwwAuthService {
            inner,
            credentials: self.credentials.clone(),
        }
    }
}

/// Service produced by [`WwwAuthLayer`]
#[derive(Clone)]
pub struct WwwAuthService<S> {
    inner: S,
    credentials: Credentials,
}

impl<S, ResBody> Service<Request<Full<Bytes>>> for WwwAuthService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let (parts, body) = req.into_parts();
        let replay = (parts.clone(), body.clone());
        let credentials = self.credentials.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let first = inner.call(Request::from_parts(parts, body));

        Box::pin(async move {
            let resp = first.await?;
            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }

            let (mut parts, body) = replay;
            let Some(authorization) = credentials.answer(&parts, resp.headers()) else {
                return Ok(resp);
            };
            drop(resp);

            tracing::debug!(
                method = %parts.method,
                uri = %parts.uri,
                "answering WWW-Authenticate challenge"
            );
            parts.headers.insert(AUTHORIZATION, authorization);
            inner
                .ready()
                .await?
                .call(Request::from_parts(parts, body))
                .await
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::context::Deadline;
    use crate::error::RetsError;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Seen {
        authorization: Option<String>,
        has_deadline: bool,
        body: Bytes,
    }

    /// Answers with a scripted sequence of `(status, WWW-Authenticate)`.
    /// The last entry repeats once the script is exhausted.
    #[derive(Clone)]
    struct ScriptedServer {
        script: Arc<Vec<(StatusCode, Option<&'static str>)>>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl ScriptedServer {
        fn new(script: Vec<(StatusCode, Option<&'static str>)>) -> Self {
            Self {
                script: Arc::new(script),
                seen: Arc::default(),
            }
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Service<Request<Full<Bytes>>> for ScriptedServer {
        type Response = Response<Full<Bytes>>;
        type Error = RetsError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let script = self.script.clone();
            let seen = self.seen.clone();
            Box::pin(async move {
                let (parts, body) = req.into_parts();
                let body = body.collect().await.unwrap().to_bytes();
                let index = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(Seen {
                        authorization: parts
                            .headers
                            .get(AUTHORIZATION)
                            .map(|v| v.to_str().unwrap().to_owned()),
                        has_deadline: parts.extensions.get::<Deadline>().is_some(),
                        body,
                    });
                    seen.len() - 1
                };

                let (status, challenge) = script[index.min(script.len() - 1)];
                let mut builder = Response::builder().status(status);
                if let Some(challenge) = challenge {
                    builder = builder.header(WWW_AUTHENTICATE, challenge);
                }
                Ok(builder.body(Full::new(Bytes::new())).unwrap())
            })
        }
    }

    fn layer() -> WwwAuthLayer {
        WwwAuthLayer::new("alice", SecretString::from("pw".to_owned()))
    }

    fn login() -> Request<Full<Bytes>> {
        Request::get("http://rets.example.com/rets/login?rets-version=rets/1.8")
            .body(Full::default())
            .unwrap()
    }

    async fn send(
        service: &mut WwwAuthService<ScriptedServer>,
        req: Request<Full<Bytes>>,
    ) -> StatusCode {
        service
            .ready()
            .await
            .unwrap()
            .call(req)
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn basic_challenge_is_answered_once() {
        let server = ScriptedServer::new(vec![(
            StatusCode::UNAUTHORIZED,
            Some("Basic realm=\"x\""),
        )]);
        let mut service = layer().layer(server.clone());

        assert_eq!(send(&mut service, login()).await, StatusCode::UNAUTHORIZED);

        let seen = server.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].authorization, None);
        assert_eq!(seen[1].authorization.as_deref(), Some("Basic YWxpY2U6cHc="));
    }

    #[tokio::test]
    async fn digest_challenge_succeeds() {
        let server = ScriptedServer::new(vec![
            (
                StatusCode::UNAUTHORIZED,
                Some("Digest realm=\"rets\", nonce=\"abc\", qop=\"auth\", opaque=\"o\""),
            ),
            (StatusCode::OK, None),
        ]);
        let mut service = layer().layer(server.clone());

        assert_eq!(send(&mut service, login()).await, StatusCode::OK);

        let seen = server.seen();
        assert_eq!(seen.len(), 2);
        let authorization = seen[1].authorization.as_deref().unwrap();
        assert!(authorization.starts_with("Digest username=\"alice\", realm=\"rets\""));
        assert!(authorization.contains("uri=\"/rets/login?rets-version=rets/1.8\""));
        assert!(authorization.contains("nc=00000001"));
        assert!(authorization.contains("opaque=\"o\""));
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let server = ScriptedServer::new(vec![(StatusCode::OK, None)]);
        let mut service = layer().layer(server.clone());

        assert_eq!(send(&mut service, login()).await, StatusCode::OK);
        assert_eq!(server.seen().len(), 1);
    }

    #[tokio::test]
    async fn unusable_challenges_return_original_401() {
        for challenge in [
            None,
            Some("Digest realm=\"unterminated"),
            Some("Negotiate abc"),
            Some("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\""),
        ] {
            let server = ScriptedServer::new(vec![(StatusCode::UNAUTHORIZED, challenge)]);
            let mut service = layer().layer(server.clone());

            assert_eq!(send(&mut service, login()).await, StatusCode::UNAUTHORIZED);
            assert_eq!(server.seen().len(), 1, "{challenge:?}");
        }
    }

    #[tokio::test]
    async fn no_credentials_returns_original_401() {
        let server = ScriptedServer::new(vec![(
            StatusCode::UNAUTHORIZED,
            Some("Basic realm=\"x\""),
        )]);
        let mut service =
            WwwAuthLayer::new("", SecretString::from(String::new())).layer(server.clone());

        assert_eq!(send(&mut service, login()).await, StatusCode::UNAUTHORIZED);
        assert_eq!(server.seen().len(), 1);
    }

    #[tokio::test]
    async fn retry_replays_body_and_extensions() {
        let server = ScriptedServer::new(vec![
            (StatusCode::UNAUTHORIZED, Some("Basic realm=\"x\"")),
            (StatusCode::OK, None),
        ]);
        let mut service = layer().layer(server.clone());

        let mut req = Request::post("http://rets.example.com/rets/search")
            .body(Full::new(Bytes::from_static(b"SearchType=Property")))
            .unwrap();
        req.extensions_mut()
            .insert(Deadline::after(Duration::from_secs(30)));
        assert_eq!(send(&mut service, req).await, StatusCode::OK);

        let seen = server.seen();
        assert_eq!(seen.len(), 2);
        for attempt in &seen {
            assert!(attempt.has_deadline);
            assert_eq!(attempt.body, "SearchType=Property");
        }
    }
}
