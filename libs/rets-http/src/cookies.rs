//! Session cookie storage.
//!
//! The cookie store is the only state shared between requests of a session.
//! It is read by the UA-auth layer (session id) and by the dispatcher
//! (`Cookie` header) while the dispatcher of another in-flight request may be
//! writing `Set-Cookie` results, so implementations must synchronise
//! internally.

use crate::error::RetsError;
use crate::headers::RETS_SESSION_COOKIE;
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use parking_lot::RwLock;
use std::io::{BufRead, Write};
use url::Url;

/// Cookie storage shared by every request of a session.
///
/// Implementations must be safe to call concurrently from many tasks.
pub trait CookieStore: Send + Sync {
    /// `Cookie` header value for a request to `url`, if any cookie matches.
    fn cookies_for(&self, url: &Url) -> Option<HeaderValue>;

    /// Record the `Set-Cookie` headers of a response received from `url`.
    fn store_from_response(&self, url: &Url, headers: &HeaderMap);

    /// Value of the cookie `name` that would be sent to `url`.
    fn cookie_value(&self, url: &Url, name: &str) -> Option<String>;

    /// Drop every stored cookie.
    fn reset(&self);

    /// The RETS session identifier for `url`, once the server has set one.
    fn session_id(&self, url: &Url) -> Option<String> {
        self.cookie_value(url, RETS_SESSION_COOKIE)
    }
}

/// In-memory RFC 6265 cookie jar.
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    inner: RwLock<cookie_store::CookieStore>,
}

impl MemoryCookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a jar previously written by [`MemoryCookieStore::save_json`].
    ///
    /// Expired cookies are dropped on load.
    ///
    /// # Errors
    /// Returns `RetsError::CookieStore` if the snapshot cannot be parsed.
    pub fn from_json<R: BufRead>(reader: R) -> Result<Self, RetsError> {
        let store = cookie_store::serde::json::load(reader).map_err(RetsError::CookieStore)?;
        Ok(Self {
            inner: RwLock::new(store),
        })
    }

    /// Write the unexpired persistent cookies as JSON.
    ///
    /// # Errors
    /// Returns `RetsError::CookieStore` if writing fails.
    pub fn save_json<W: Write>(&self, writer: &mut W) -> Result<(), RetsError> {
        let store = self.inner.read();
        cookie_store::serde::json::save(&store, writer).map_err(RetsError::CookieStore)
    }
}

impl CookieStore for MemoryCookieStore {
    fn cookies_for(&self, url: &Url) -> Option<HeaderValue> {
        let header = {
            let store = self.inner.read();
            store
                .get_request_values(url)
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ")
        };
        if header.is_empty() {
            return None;
        }
        HeaderValue::from_str(&header).ok()
    }

    fn store_from_response(&self, url: &Url, headers: &HeaderMap) {
        let cookies: Vec<cookie::Cookie<'static>> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| cookie::Cookie::parse(value.to_owned()).ok())
            .collect();
        if cookies.is_empty() {
            return;
        }

        tracing::debug!(
            count = cookies.len(),
            host = url.host_str().unwrap_or_default(),
            "storing response cookies"
        );
        self.inner
            .write()
            .store_response_cookies(cookies.into_iter(), url);
    }

    fn cookie_value(&self, url: &Url, name: &str) -> Option<String> {
        let store = self.inner.read();
        store
            .get_request_values(url)
            .find(|(cookie_name, _)| *cookie_name == name)
            .map(|(_, value)| value.to_owned())
    }

    fn reset(&self) {
        self.inner.write().clear();
    }
}
