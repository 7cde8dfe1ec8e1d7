//! XML token decoding for RETS payloads.
//!
//! The decoder always reads through [`Xml10Filter`] and only transcodes when
//! the document itself declares an encoding in its XML declaration. HTTP
//! headers are deliberately not consulted here; use
//! [`re_encode_reader`](crate::re_encode_reader) for that.

use crate::charset::{ReEncoded, lookup_label, transcode};
use crate::error::DecodeError;
use crate::filter::{Substitution, Xml10Filter};
use encoding_rs::Encoding;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::io::{self, BufReader, Cursor, Read};

/// Resolves an encoding label found in an XML declaration.
pub type CharsetHook = fn(&str) -> Option<&'static Encoding>;

/// Upper bound on how much of the stream is inspected for a declaration.
const PROLOG_SNIFF_LIMIT: usize = 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[allow(clippy::expect_used)] // constant pattern, cannot fail
static DECLARED_ENCODING: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(
        r#"(?-u)^(?:\xEF\xBB\xBF)?\s*<\?xml\s[^>]*?\bencoding\s*=\s*["']([A-Za-z][A-Za-z0-9._:-]*)["']"#,
    )
    .expect("static regex should not panic")
});

type Source<R> = ReEncoded<io::Chain<Cursor<Vec<u8>>, Xml10Filter<R>>>;

/// A single XML token with owned, UTF-8 contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    CharData(String),
    Comment(String),
    ProcInst(String),
    Directive(String),
}

/// Immutable decoder settings, reusable across any number of documents.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    strict: bool,
    charset_hook: CharsetHook,
    substitution: Substitution,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            strict: true,
            charset_hook: lookup_label,
            substitution: Substitution::default(),
        }
    }
}

impl DecoderConfig {
    /// Strict decoding: malformed documents are errors.
    #[must_use]
    pub fn strict() -> Self {
        Self::default()
    }

    /// Lenient decoding: mismatched or stray end tags, unknown entities and
    /// sloppy attributes are tolerated where possible.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    /// Replace the lookup used for declared encodings.
    #[must_use]
    pub fn with_charset_hook(mut self, hook: CharsetHook) -> Self {
        self.charset_hook = hook;
        self
    }

    /// Set how illegal XML 1.0 characters are handled.
    #[must_use]
    pub fn with_substitution(mut self, substitution: Substitution) -> Self {
        self.substitution = substitution;
        self
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Build a decoder over `input`.
    ///
    /// # Errors
    /// Returns [`DecodeError::Io`] if the prolog cannot be read, and
    /// [`DecodeError::UnknownEncoding`] in strict mode when the declared
    /// encoding is not recognised by the charset hook.
    pub fn decoder<R: Read>(&self, input: R) -> Result<XmlDecoder<R>, DecodeError> {
        let mut filtered = Xml10Filter::with_substitution(input, self.substitution);
        let mut prolog = sniff_prolog(&mut filtered)?;

        let encoding = match declared_encoding(&prolog) {
            Some(label) => match (self.charset_hook)(&label) {
                Some(encoding) => Some(encoding),
                None if self.strict => return Err(DecodeError::UnknownEncoding { label }),
                None => {
                    tracing::warn!(label = %label, "unknown declared XML encoding; reading as UTF-8");
                    None
                }
            },
            None => None,
        };

        let is_utf8 = encoding.is_none() || encoding == Some(encoding_rs::UTF_8);
        if is_utf8 && prolog.starts_with(UTF8_BOM) {
            prolog.drain(..UTF8_BOM.len());
        }

        let chained = Cursor::new(prolog).chain(filtered);
        let source: Source<R> = match encoding {
            Some(encoding) => transcode(chained, encoding),
            None => ReEncoded::Passthrough(chained),
        };

        let mut reader = Reader::from_reader(BufReader::new(source));
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = self.strict;
        config.allow_unmatched_ends = !self.strict;
        config.check_comments = self.strict;

        Ok(XmlDecoder {
            reader,
            buf: Vec::new(),
            strict: self.strict,
            open: Vec::new(),
            done: false,
        })
    }
}

/// Create a decoder with the default charset hook and space substitution.
///
/// # Errors
/// See [`DecoderConfig::decoder`].
pub fn create_xml_decoder<R: Read>(input: R, strict: bool) -> Result<XmlDecoder<R>, DecodeError> {
    let config = if strict {
        DecoderConfig::strict()
    } else {
        DecoderConfig::lenient()
    };
    config.decoder(input)
}

/// Pull-based XML token decoder.
///
/// Also usable as an iterator; iteration stops after the first error.
pub struct XmlDecoder<R: Read> {
    reader: Reader<BufReader<Source<R>>>,
    buf: Vec<u8>,
    strict: bool,
    open: Vec<String>,
    done: bool,
}

impl<R: Read> XmlDecoder<R> {
    /// Byte offset of the decoder in the filtered, UTF-8 stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.reader.buffer_position()
    }

    /// Read the next token. Returns `Ok(None)` at end of document.
    ///
    /// # Errors
    /// Returns [`DecodeError::Syntax`] for malformed input and, in strict
    /// mode, [`DecodeError::Unclosed`] when the document ends early.
    pub fn next_token(&mut self) -> Result<Option<Token>, DecodeError> {
        while !self.done {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) => {
                    self.done = true;
                    return Err(DecodeError::Syntax {
                        position: self.reader.error_position(),
                        source,
                    });
                }
            };

            let converted = match event {
                Event::Start(start) => start_token(&start, self.strict).map(|token| {
                    if let Token::StartElement { name, .. } = &token {
                        self.open.push(name.clone());
                    }
                    Some(token)
                }),
                Event::Empty(start) => start_token(&start, self.strict).map(Some),
                Event::End(end) => {
                    let name = lossy(end.name().as_ref());
                    close(&mut self.open, &name);
                    Ok(Some(Token::EndElement { name }))
                }
                Event::Text(text) => text_token(&text, self.strict).map(Some),
                Event::CData(cdata) => Ok(Some(Token::CharData(lossy(&cdata.into_inner())))),
                Event::Comment(comment) => Ok(Some(Token::Comment(lossy(&comment)))),
                Event::PI(pi) => Ok(Some(Token::ProcInst(lossy(&pi)))),
                Event::DocType(doctype) => Ok(Some(Token::Directive(lossy(&doctype)))),
                Event::Decl(_) => Ok(None),
                Event::Eof => {
                    self.done = true;
                    if self.strict
                        && let Some(name) = self.open.pop()
                    {
                        return Err(DecodeError::Unclosed {
                            position: self.reader.buffer_position(),
                            name,
                        });
                    }
                    return Ok(None);
                }
            };

            match converted {
                Ok(Some(token)) => return Ok(Some(token)),
                Ok(None) => {}
                Err(source) => {
                    self.done = true;
                    return Err(DecodeError::Syntax {
                        position: self.reader.buffer_position(),
                        source,
                    });
                }
            }
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for XmlDecoder<R> {
    type Item = Result<Token, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn close(open: &mut Vec<String>, name: &str) {
    // Strict mode has already verified the name; lenient mode may skip levels.
    if let Some(idx) = open.iter().rposition(|n| n == name) {
        open.truncate(idx);
    }
}

fn start_token(start: &BytesStart<'_>, strict: bool) -> Result<Token, quick_xml::Error> {
    let name = lossy(start.name().as_ref());
    let mut attrs = if strict {
        start.attributes()
    } else {
        start.html_attributes()
    };

    let mut attributes = Vec::new();
    for attr in attrs.with_checks(strict) {
        let attr = attr?;
        let key = lossy(attr.key.as_ref());
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(e) if strict => return Err(e),
            Err(_) => lossy(&attr.value),
        };
        attributes.push((key, value));
    }
    Ok(Token::StartElement { name, attributes })
}

fn text_token(text: &BytesText<'_>, strict: bool) -> Result<Token, quick_xml::Error> {
    let data = match text.unescape() {
        Ok(Cow::Borrowed(s)) => s.to_owned(),
        Ok(Cow::Owned(s)) => s,
        Err(e) if strict => return Err(e),
        Err(_) => lossy(text),
    };
    Ok(Token::CharData(data))
}

/// Read enough of the stream to see a complete XML declaration, if any.
fn sniff_prolog<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prolog = Vec::with_capacity(128);
    let mut chunk = [0u8; 128];
    while prolog.len() < PROLOG_SNIFF_LIMIT && may_hold_declaration(&prolog) {
        if prolog.windows(2).any(|w| w == b"?>") {
            break;
        }
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        prolog.extend_from_slice(&chunk[..n]);
    }
    Ok(prolog)
}

fn may_hold_declaration(prolog: &[u8]) -> bool {
    let body = prolog.strip_prefix(UTF8_BOM).unwrap_or(prolog);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let head = &body[start..];
    let n = head.len().min(5);
    head[..n] == b"<?xml"[..n]
}

fn declared_encoding(prolog: &[u8]) -> Option<String> {
    let caps = DECLARED_ENCODING.captures(prolog)?;
    let label = caps.get(1)?;
    Some(lossy(label.as_bytes()))
}
