#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Response payload normalization for RETS
//!
//! RETS servers are notorious for serving XML that is not quite XML: wrong or
//! missing charsets, raw control characters inside listing remarks, and the
//! occasional unbalanced tag. This crate provides:
//! - A byte-level XML 1.0 filter ([`Xml10Filter`])
//! - `Content-Type` driven re-encoding to UTF-8 ([`re_encode_reader`])
//! - A strict or lenient token decoder that honours the document's own
//!   encoding declaration ([`create_xml_decoder`], [`DecoderConfig`])
//!
//! # Example
//!
//! ```ignore
//! use rets_xml::{Token, create_xml_decoder, re_encode_reader};
//!
//! let body = re_encode_reader(&bytes[..], content_type);
//! for token in create_xml_decoder(body, false)? {
//!     if let Token::StartElement { name, attributes } = token? {
//!         println!("{name}: {attributes:?}");
//!     }
//! }
//! ```

mod charset;
mod decoder;
mod error;
mod filter;

pub use charset::{
    ReEncoded, Utf8Transcoder, assume_utf8, charset_param, lookup_label, re_encode_reader,
    resolve_encoding, transcode,
};
pub use decoder::{CharsetHook, DecoderConfig, Token, XmlDecoder, create_xml_decoder};
pub use error::DecodeError;
pub use filter::{Substitution, Xml10Filter, is_illegal_byte};
