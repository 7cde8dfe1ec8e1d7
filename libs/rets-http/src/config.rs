use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default User-Agent string for RETS requests
pub const DEFAULT_USER_AGENT: &str = concat!("rets-http/", env!("CARGO_PKG_VERSION"));

/// Default protocol version sent in `RETS-Version`
pub const DEFAULT_RETS_VERSION: &str = "RETS/1.7.2";

/// Value of the `Accept` header on every request
pub const ACCEPT_ANY: &str = "*/*";

/// Default maximum response body size (search results can be large)
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP. Many RETS servers still serve HTTP on private
    /// networks; also used for tests against mock servers.
    AllowInsecureHttp,
}

/// Settings for the built-in hyper transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt timeout enforced by the transport (default: 5 minutes)
    ///
    /// RETS search and `GetObject` transactions routinely take minutes, so
    /// this is much longer than a typical API client would use.
    pub request_timeout: Duration,

    /// TLS root certificate source (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// Idle timeout for pooled connections (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            tls_roots: TlsRootConfig::default(),
            transport: TransportSecurity::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Configuration for tests against local mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            transport: TransportSecurity::AllowInsecureHttp,
            ..Default::default()
        }
    }
}

/// Static credentials and protocol parameters of one RETS session
#[derive(Debug)]
pub struct SessionConfig {
    /// Login name used for `WWW-Authenticate` challenges
    pub username: String,

    /// Password used for `WWW-Authenticate` challenges
    pub password: SecretString,

    /// `User-Agent` value; also the identity bound by the UA digest
    pub user_agent: String,

    /// User-agent password. `None` or empty disables `RETS-UA-Authorization`.
    pub user_agent_password: Option<SecretString>,

    /// `RETS-Version` value (default: `RETS/1.7.2`)
    pub rets_version: String,

    /// Deadline applied to each `send` that does not carry its own
    /// (default: none)
    pub request_timeout: Option<Duration>,

    /// Maximum response body size in bytes (default: 64 MiB)
    pub max_body_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: SecretString::from(String::new()),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            user_agent_password: None,
            rets_version: DEFAULT_RETS_VERSION.to_owned(),
            request_timeout: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl SessionConfig {
    /// The user-agent password, if UA authentication is enabled.
    #[must_use]
    pub fn ua_password(&self) -> Option<&str> {
        self.user_agent_password
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|pw| !pw.is_empty())
    }
}
