#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Authenticated RETS request pipeline
//!
//! A [`RetsSession`] is a stack of tower layers in front of an HTTP
//! transport:
//! - Static headers (`User-Agent`, `RETS-Version`, `Accept`)
//! - `RETS-UA-Authorization` user-agent digest bound to the server session
//! - A single `Basic`/`Digest` answer to a `WWW-Authenticate` challenge
//! - Session cookies and per-request deadlines
//!
//! The default transport is hyper with rustls, connection pooling and
//! transparent gzip/br/deflate decompression. Any tower service with the
//! same request and response types can replace it.
//!
//! Response payloads are decoded with [`rets_xml`]; see
//! [`RetsResponse::xml_decoder`].
//!
//! # Example
//!
//! ```ignore
//! use rets_http::{Deadline, RetsSession};
//! use rets_xml::DecoderConfig;
//! use std::time::Duration;
//!
//! let session = RetsSession::builder()
//!     .username("alice")
//!     .password("pw")
//!     .user_agent("RETSClient/1.0")
//!     .user_agent_password("secret")
//!     .rets_version("RETS/1.8")
//!     .timeout(Duration::from_secs(120))
//!     .build()?;
//!
//! let login = session.get("https://rets.example.com/rets/login").await?;
//! let mut decoder = login.xml_decoder(DecoderConfig::lenient()).await?;
//! while let Some(token) = decoder.next_token()? {
//!     println!("{token:?}");
//! }
//! ```

mod builder;
pub mod challenge;
mod config;
mod context;
mod cookies;
mod error;
pub mod headers;
pub mod layers;
mod response;
mod session;
mod tls;
mod transport;

pub use builder::RetsSessionBuilder;
pub use config::{
    ACCEPT_ANY, DEFAULT_MAX_BODY_SIZE, DEFAULT_RETS_VERSION, DEFAULT_USER_AGENT, SessionConfig,
    TlsRootConfig, TransportConfig, TransportSecurity,
};
pub use context::Deadline;
pub use cookies::{CookieStore, MemoryCookieStore};
pub use error::RetsError;
pub use response::{LimitedBody, ResponseBody, RetsResponse, full_body};
pub use session::{RetsService, RetsSession};
pub use transport::HyperTransport;
