use crate::builder::RetsSessionBuilder;
use crate::context::Deadline;
use crate::cookies::CookieStore;
use crate::error::RetsError;
use crate::response::{ResponseBody, RetsResponse};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response};
use http_body_util::Full;
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};
use url::Url;

/// Type-erased RETS pipeline (and transport) service.
pub type RetsService = BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, RetsError>;

/// An authenticated RETS session.
///
/// Cheap to clone; clones share the cookie store and therefore the server
/// session. Concurrent `send` calls are safe and run on the caller's task.
///
/// # Example
///
/// ```ignore
/// let session = RetsSession::builder()
///     .username("alice")
///     .password("pw")
///     .user_agent("RETSClient/1.0")
///     .user_agent_password("secret")
///     .build()?;
///
/// let login = session.get("https://rets.example.com/rets/login").await?;
/// for token in login.xml_decoder(DecoderConfig::lenient()).await? {
///     println!("{:?}", token?);
/// }
/// ```
#[derive(Clone)]
pub struct RetsSession {
    pub(crate) service: RetsService,
    pub(crate) cookies: Arc<dyn CookieStore>,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) max_body_size: usize,
}

impl std::fmt::Debug for RetsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetsSession")
            .field("default_timeout", &self.default_timeout)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

impl RetsSession {
    #[must_use]
    pub fn builder() -> RetsSessionBuilder {
        RetsSessionBuilder::new()
    }

    /// Send a request through the pipeline.
    ///
    /// Requests without a [`Deadline`] extension get one from the session's
    /// default timeout, when configured. Any HTTP status is `Ok`, including
    /// a `401` that survived the challenge retry.
    ///
    /// # Errors
    /// `RetsError::InvalidUri` for non-absolute URLs, `RetsError::DeadlineExceeded`
    /// when the deadline passes, and transport errors as produced by the
    /// transport.
    pub async fn send(&self, mut req: Request<Full<Bytes>>) -> Result<RetsResponse, RetsError> {
        if let Some(timeout) = self.default_timeout
            && req.extensions().get::<Deadline>().is_none()
        {
            req.extensions_mut().insert(Deadline::after(timeout));
        }

        let mut service = self.service.clone();
        let resp = service.ready().await?.call(req).await?;
        Ok(RetsResponse::new(resp, self.max_body_size))
    }

    /// `GET url`
    ///
    /// # Errors
    /// See [`RetsSession::send`].
    pub async fn get(&self, url: &str) -> Result<RetsResponse, RetsError> {
        let req = Request::get(url).body(Full::default())?;
        self.send(req).await
    }

    /// `POST url` with an `application/x-www-form-urlencoded` body, the form
    /// most RETS servers expect for Search and `GetObject`.
    ///
    /// # Errors
    /// See [`RetsSession::send`].
    pub async fn post_form(
        &self,
        url: &str,
        form: impl Into<Bytes>,
    ) -> Result<RetsResponse, RetsError> {
        let req = Request::post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(form.into()))?;
        self.send(req).await
    }

    /// The composed pipeline, for callers that want to add their own tower
    /// layers on top.
    #[must_use]
    pub fn service(&self) -> RetsService {
        self.service.clone()
    }

    #[must_use]
    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    /// Current RETS session id for `url`, once a login response set one.
    #[must_use]
    pub fn session_id(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.cookies.session_id(&url)
    }

    /// Forget all cookies, e.g. after a RETS `Logout` transaction.
    pub fn reset(&self) {
        self.cookies.reset();
    }
}
