//! RETS header names.
//!
//! Standard names (`User-Agent`, `Accept`, `Authorization`,
//! `WWW-Authenticate`, `Content-Type`) come from [`http::header`].

use http::HeaderName;

/// Protocol version the client speaks, e.g. `RETS/1.7.2`.
pub const RETS_VERSION: HeaderName = HeaderName::from_static("rets-version");

/// Session identifier echoed by some servers as a header.
pub const RETS_SESSION_ID: HeaderName = HeaderName::from_static("rets-session-id");

/// Optional caller-chosen request identifier, part of the UA digest.
pub const RETS_REQUEST_ID: HeaderName = HeaderName::from_static("rets-request-id");

/// User-agent authentication digest.
pub const RETS_UA_AUTHORIZATION: HeaderName = HeaderName::from_static("rets-ua-authorization");

/// Name of the cookie carrying the RETS session identifier.
pub const RETS_SESSION_COOKIE: &str = "RETS-Session-ID";
