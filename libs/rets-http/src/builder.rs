use crate::config::{SessionConfig, TlsRootConfig, TransportConfig, TransportSecurity};
use crate::cookies::{CookieStore, MemoryCookieStore};
use crate::error::RetsError;
use crate::layers::{DispatchLayer, HeaderDefaultsLayer, UaAuthLayer, WwwAuthLayer};
use crate::response::ResponseBody;
use crate::session::{RetsService, RetsSession};
use crate::transport::HyperTransport;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder};

/// Builder for a [`RetsSession`].
///
/// `build()` performs no network I/O.
pub struct RetsSessionBuilder {
    config: SessionConfig,
    transport_config: TransportConfig,
    transport: Option<RetsService>,
    cookies: Option<Arc<dyn CookieStore>>,
    cookie_snapshot: Option<Vec<u8>>,
}

impl RetsSessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            transport_config: TransportConfig::default(),
            transport: None,
            cookies: None,
            cookie_snapshot: None,
        }
    }

    /// Login name for `WWW-Authenticate` challenges
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = SecretString::from(password.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enables `RETS-UA-Authorization`. An empty password leaves it off.
    #[must_use]
    pub fn user_agent_password(mut self, password: impl Into<String>) -> Self {
        self.config.user_agent_password = Some(SecretString::from(password.into()));
        self
    }

    /// `RETS-Version` value, e.g. `RETS/1.8`
    #[must_use]
    pub fn rets_version(mut self, version: impl Into<String>) -> Self {
        self.config.rets_version = version.into();
        self
    }

    /// Default deadline for requests that do not carry their own
    /// [`Deadline`](crate::Deadline). Covers the challenge retry too.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Settings for the built-in transport. Ignored with [`Self::transport`].
    #[must_use]
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.transport_config.tls_roots = roots;
        self
    }

    /// Allow plain `http://` URLs on the built-in transport.
    ///
    /// Credentials and session cookies then travel unencrypted.
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        self.transport_config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Replace the built-in hyper transport.
    ///
    /// The service receives fully prepared requests (auth headers and
    /// cookies attached) and must not follow redirects on its own.
    #[must_use]
    pub fn transport<S>(mut self, transport: S) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = RetsError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.transport = Some(BoxCloneSyncService::new(transport));
        self
    }

    /// Use a caller-provided cookie store, e.g. one shared by several
    /// sessions against the same server.
    ///
    /// Replaces a snapshot set earlier with [`Self::cookie_snapshot`]; the
    /// last of the two calls decides where cookies come from.
    #[must_use]
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(store);
        self.cookie_snapshot = None;
        self
    }

    /// Seed a new [`MemoryCookieStore`] with a JSON snapshot written by
    /// [`MemoryCookieStore::save_json`]. Parsed by `build()`.
    ///
    /// Replaces a store set earlier with [`Self::cookie_store`].
    #[must_use]
    pub fn cookie_snapshot(mut self, json: impl Into<Vec<u8>>) -> Self {
        self.cookie_snapshot = Some(json.into());
        self.cookies = None;
        self
    }

    /// Compose the pipeline.
    ///
    /// Request flow (outer to inner):
    ///   `HeaderDefaults → UaAuth → WwwAuth → Dispatch → transport`
    ///
    /// `UaAuth` sits outside `WwwAuth`, so the challenge retry reuses the UA
    /// digest of the original request. `Dispatch` sits inside, so both
    /// attempts pick up cookies and honour the deadline.
    ///
    /// # Errors
    /// - `RetsError::CookieStore` if the cookie snapshot cannot be parsed
    /// - `RetsError::InvalidHeaderValue` for an illegal user agent or version
    /// - `RetsError::Tls` if the built-in transport cannot set up TLS
    pub fn build(self) -> Result<RetsSession, RetsError> {
        let cookies: Arc<dyn CookieStore> = match (self.cookies, self.cookie_snapshot) {
            (Some(store), _) => store,
            (None, Some(snapshot)) => Arc::new(MemoryCookieStore::from_json(snapshot.as_slice())?),
            (None, None) => Arc::new(MemoryCookieStore::new()),
        };

        let config = self.config;
        let defaults = HeaderDefaultsLayer::try_new(&config.user_agent, &config.rets_version)?;
        let ua_auth = UaAuthLayer::new(
            &config.user_agent,
            config.ua_password(),
            &config.rets_version,
            cookies.clone(),
        );
        let www_auth = WwwAuthLayer::new(&config.username, config.password);

        let transport = match self.transport {
            Some(transport) => transport,
            None => BoxCloneSyncService::new(HyperTransport::new(&self.transport_config)?),
        };

        let service = ServiceBuilder::new()
            .layer(defaults)
            .layer(ua_auth)
            .layer(www_auth)
            .layer(DispatchLayer::new(cookies.clone()))
            .service(transport);

        Ok(RetsSession {
            service: BoxCloneSyncService::new(service),
            cookies,
            default_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
        })
    }
}

impl Default for RetsSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MAX_BODY_SIZE, DEFAULT_RETS_VERSION, DEFAULT_USER_AGENT};
    use secrecy::ExposeSecret;

    #[test]
    fn builder_defaults() {
        let builder = RetsSessionBuilder::new();
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.rets_version, DEFAULT_RETS_VERSION);
        assert_eq!(builder.config.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert!(builder.config.request_timeout.is_none());
        assert_eq!(builder.transport_config.transport, TransportSecurity::TlsOnly);
    }

    #[test]
    fn builder_setters() {
        let builder = RetsSessionBuilder::new()
            .username("alice")
            .password("pw")
            .user_agent("RETSClient/1.0")
            .user_agent_password("secret")
            .rets_version("RETS/1.8")
            .timeout(Duration::from_secs(30))
            .max_body_size(1024)
            .tls_roots(TlsRootConfig::Native)
            .allow_insecure_http();

        assert_eq!(builder.config.username, "alice");
        assert_eq!(builder.config.password.expose_secret(), "pw");
        assert_eq!(builder.config.user_agent, "RETSClient/1.0");
        assert_eq!(builder.config.ua_password(), Some("secret"));
        assert_eq!(builder.config.rets_version, "RETS/1.8");
        assert_eq!(builder.config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(builder.config.max_body_size, 1024);
        assert_eq!(builder.transport_config.tls_roots, TlsRootConfig::Native);
        assert_eq!(
            builder.transport_config.transport,
            TransportSecurity::AllowInsecureHttp
        );
    }

    #[tokio::test]
    async fn build_with_default_transport() {
        let session = RetsSessionBuilder::new().build().unwrap();
        assert!(session.default_timeout.is_none());
    }

    #[test]
    fn invalid_cookie_snapshot_fails_build() {
        let result = RetsSessionBuilder::new()
            .cookie_snapshot("definitely not json")
            .build();
        assert!(matches!(result, Err(RetsError::CookieStore(_))));
    }

    #[test]
    fn invalid_user_agent_fails_build() {
        let result = RetsSessionBuilder::new().user_agent("bad\r\nagent").build();
        assert!(matches!(result, Err(RetsError::InvalidHeaderValue(_))));
    }

    #[test]
    fn cookie_snapshot_restores_session() {
        let store = MemoryCookieStore::new();
        let url = url::Url::parse("http://rets.example.com/rets/login").unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::SET_COOKIE,
            "RETS-Session-ID=S123; Path=/; Max-Age=3600".parse().unwrap(),
        );
        store.store_from_response(&url, &headers);
        let mut snapshot = Vec::new();
        store.save_json(&mut snapshot).unwrap();

        let session = RetsSessionBuilder::new()
            .cookie_snapshot(snapshot)
            .build()
            .unwrap();
        assert_eq!(
            session.session_id("http://rets.example.com/rets/search").as_deref(),
            Some("S123")
        );
    }

    #[test]
    fn last_cookie_source_wins() {
        let shared: Arc<dyn CookieStore> = Arc::new(MemoryCookieStore::new());

        let session = RetsSessionBuilder::new()
            .cookie_snapshot(b"{not json".to_vec())
            .cookie_store(shared.clone())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(session.cookies(), &shared));

        let result = RetsSessionBuilder::new()
            .cookie_store(shared)
            .cookie_snapshot(b"{not json".to_vec())
            .build();
        assert!(matches!(result, Err(RetsError::CookieStore(_))));
    }
}
