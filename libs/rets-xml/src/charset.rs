//! Charset resolution and re-encoding to UTF-8.

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use std::io::{self, Read};

/// Bytes pulled from the source reader per refill.
const CHUNK_SIZE: usize = 8 * 1024;

/// Look up an encoding by its WHATWG label (`utf-16`, `iso-8859-1`, ...).
///
/// This is the default charset hook used by the XML decoder.
#[must_use]
pub fn lookup_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Charset hook for streams that were already re-encoded to UTF-8, so a
/// leftover `encoding="..."` in the XML declaration is ignored.
#[must_use]
pub fn assume_utf8(_label: &str) -> Option<&'static Encoding> {
    Some(UTF_8)
}

/// Extract the `charset` parameter from a `Content-Type` value, lowercased.
///
/// Returns `None` when the value does not parse as a media type or carries no
/// charset.
#[must_use]
pub fn charset_param(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.trim().parse().ok()?;
    mime.get_param(mime::CHARSET)
        .map(|name| name.as_str().trim_matches('"').to_ascii_lowercase())
}

/// Resolve the encoding declared by a `Content-Type` value.
///
/// `None` means "nothing declared or label unknown"; callers treat that the
/// same as UTF-8.
#[must_use]
pub fn resolve_encoding(content_type: &str) -> Option<&'static Encoding> {
    let label = charset_param(content_type)?;
    let encoding = lookup_label(&label);
    if encoding.is_none() {
        tracing::debug!(label = %label, "unknown charset label; leaving payload untouched");
    }
    encoding
}

/// A reader that is either the caller's original stream or a UTF-8
/// transcoder that owns it.
///
/// Dropping a `Transcoded` value drops the wrapped reader as well.
pub enum ReEncoded<R> {
    /// The stream was already UTF-8 (or undeclared) and is returned as is.
    Passthrough(R),
    /// The stream is decoded from its source encoding into UTF-8.
    Transcoded(Utf8Transcoder<R>),
}

impl<R> ReEncoded<R> {
    /// Returns `true` if no transcoding happens.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough(_))
    }

    /// Give back the source reader. Bytes buffered by a transcoder are lost.
    #[must_use]
    pub fn into_inner(self) -> R {
        match self {
            Self::Passthrough(inner) => inner,
            Self::Transcoded(transcoder) => transcoder.into_inner(),
        }
    }
}

impl<R> std::fmt::Debug for ReEncoded<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passthrough(_) => f.write_str("ReEncoded::Passthrough"),
            Self::Transcoded(t) => write!(f, "ReEncoded::Transcoded({})", t.encoding().name()),
        }
    }
}

impl<R: Read> Read for ReEncoded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Passthrough(inner) => inner.read(buf),
            Self::Transcoded(inner) => inner.read(buf),
        }
    }
}

/// Streaming decoder from a source encoding into UTF-8.
///
/// Malformed sequences become U+FFFD. A byte order mark at the start of the
/// stream takes precedence over the configured encoding and is removed.
pub struct Utf8Transcoder<R> {
    inner: R,
    decoder: Decoder,
    input: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    output: Vec<u8>,
    out_pos: usize,
    eof: bool,
    flushed: bool,
}

impl<R> Utf8Transcoder<R> {
    /// Encoding currently used; may differ from the requested one after a BOM.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.decoder.encoding()
    }

    /// Give back the source reader.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Utf8Transcoder<R> {
    #[must_use]
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            input: vec![0; CHUNK_SIZE].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            output: Vec::new(),
            out_pos: 0,
            eof: false,
            flushed: false,
        }
    }

    fn fill_input(&mut self) -> io::Result<()> {
        loop {
            match self.inner.read(&mut self.input) {
                Ok(n) => {
                    self.in_pos = 0;
                    self.in_len = n;
                    self.eof = n == 0;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn decode_pending(&mut self) -> io::Result<()> {
        let pending = &self.input[self.in_pos..self.in_len];
        let needed = self
            .decoder
            .max_utf8_buffer_length(pending.len())
            .ok_or_else(|| io::Error::other("transcoding buffer size overflow"))?;

        self.output.clear();
        self.output.resize(needed, 0);
        self.out_pos = 0;

        let (result, read, written, _) =
            self.decoder
                .decode_to_utf8(pending, &mut self.output, self.eof);
        self.output.truncate(written);
        self.in_pos += read;
        if self.eof && result == CoderResult::InputEmpty {
            self.flushed = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for Utf8Transcoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.output.len() {
                let available = &self.output[self.out_pos..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.flushed {
                return Ok(0);
            }
            if self.in_pos == self.in_len && !self.eof {
                self.fill_input()?;
            }
            self.decode_pending()?;
        }
    }
}

/// Wrap `reader` in a transcoder from `encoding` to UTF-8.
///
/// UTF-8 needs no work and yields [`ReEncoded::Passthrough`]. A byte order
/// mark in the stream overrides `encoding`.
pub fn transcode<R: Read>(reader: R, encoding: &'static Encoding) -> ReEncoded<R> {
    if encoding == UTF_8 {
        return ReEncoded::Passthrough(reader);
    }
    tracing::trace!(encoding = encoding.name(), "re-encoding payload to UTF-8");
    ReEncoded::Transcoded(Utf8Transcoder::new(reader, encoding))
}

/// Re-encode `reader` to UTF-8 according to an HTTP `Content-Type` value.
///
/// No charset parameter, an unknown label, or UTF-8 returns the original
/// reader untouched.
pub fn re_encode_reader<R: Read>(reader: R, content_type: &str) -> ReEncoded<R> {
    match resolve_encoding(content_type) {
        Some(encoding) => transcode(reader, encoding),
        None => ReEncoded::Passthrough(reader),
    }
}
