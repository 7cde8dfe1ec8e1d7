//! Tower layers of the RETS request pipeline
//!
//! Composed outer to inner by [`RetsSessionBuilder`](crate::RetsSessionBuilder):
//!
//! - [`HeaderDefaultsLayer`] - Sets `User-Agent`, `RETS-Version` and `Accept`
//! - [`UaAuthLayer`] - Attaches the `RETS-UA-Authorization` digest
//! - [`WwwAuthLayer`] - Answers a single `Basic`/`Digest` challenge
//! - [`DispatchLayer`] - Cookies and deadline around the transport

mod defaults;
pub(crate) mod dispatch;
mod ua_auth;
mod www_auth;

pub use defaults::{HeaderDefaultsLayer, HeaderDefaultsService};
pub use dispatch::{DispatchLayer, DispatchService, request_url};
pub use ua_auth::{UaAuthContext, UaAuthLayer, UaAuthService};
pub use www_auth::{WwwAuthLayer, WwwAuthService};
