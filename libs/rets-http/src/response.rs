use crate::error::RetsError;
use crate::headers::{RETS_SESSION_COOKIE, RETS_SESSION_ID};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, Response, StatusCode};
use http_body::{Frame, SizeHint};
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;
use rets_xml::{DecoderConfig, ReEncoded, XmlDecoder, assume_utf8, re_encode_reader};
use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Type-erased response body produced by every transport.
///
/// The default transport hands out already-decompressed bytes.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Box an in-memory payload as a [`ResponseBody`].
///
/// Useful for custom transports and stubs.
#[must_use]
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

pin_project! {
    /// Response body that fails with [`RetsError::BodyTooLarge`] as soon as
    /// more than `limit` bytes have been seen.
    ///
    /// Every body read of a [`RetsResponse`] goes through this wrapper.
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        seen: usize,
    }
}

impl LimitedBody {
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            seen: 0,
        }
    }

    /// Data bytes passed through so far.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.seen
    }
}

impl http_body::Body for LimitedBody {
    type Data = Bytes;
    type Error = RetsError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Poll::Ready(Some(Err(RetsError::Transport(e)))),
            None => return Poll::Ready(None),
        };

        if let Some(data) = frame.data_ref() {
            *this.seen = this.seen.saturating_add(data.len());
            if *this.seen > *this.limit {
                return Poll::Ready(Some(Err(RetsError::BodyTooLarge {
                    limit: *this.limit,
                    actual: *this.seen,
                })));
            }
        }
        Poll::Ready(Some(Ok(frame)))
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Response of one RETS transaction
///
/// Any status is a valid response, including a `401` that survived the
/// challenge retry. Body reads enforce the session's `max_body_size`.
#[derive(Debug)]
pub struct RetsResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl RetsResponse {
    #[must_use]
    pub fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// `Content-Type` header, if present and valid UTF-8
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.inner
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Session id announced by this response, from a `RETS-Session-ID`
    /// `Set-Cookie` or the header of the same name.
    #[must_use]
    pub fn rets_session_id(&self) -> Option<String> {
        let headers = self.inner.headers();
        let from_cookie = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| cookie::Cookie::parse(v).ok())
            .find(|c| c.name() == RETS_SESSION_COOKIE)
            .map(|c| c.value().to_owned());
        from_cookie.or_else(|| {
            headers
                .get(RETS_SESSION_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        })
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Consume the wrapper and return the inner response
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Size-limited body stream.
    #[must_use]
    pub fn into_limited_body(self) -> LimitedBody {
        LimitedBody::new(self.inner.into_body(), self.max_body_size)
    }

    /// Read the whole body
    ///
    /// # Errors
    /// Returns `RetsError::BodyTooLarge` if the body exceeds the limit, or
    /// `RetsError::Transport` if reading fails.
    pub async fn bytes(self) -> Result<Bytes, RetsError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read the body and re-encode it to UTF-8 according to `Content-Type`.
    ///
    /// # Errors
    /// See [`RetsResponse::bytes`].
    pub async fn body_reader(self) -> Result<ReEncoded<Cursor<Bytes>>, RetsError> {
        let content_type = self.content_type().unwrap_or_default().to_owned();
        let body = self.bytes().await?;
        Ok(re_encode_reader(Cursor::new(body), &content_type))
    }

    /// Read the body and open an XML token decoder over it.
    ///
    /// A `Content-Type` charset is applied first; when it re-encodes the
    /// payload, the document's own encoding declaration is ignored.
    ///
    /// # Errors
    /// Body errors as for [`RetsResponse::bytes`], and `RetsError::Decode`
    /// when the decoder cannot be created.
    pub async fn xml_decoder(
        self,
        config: DecoderConfig,
    ) -> Result<XmlDecoder<ReEncoded<Cursor<Bytes>>>, RetsError> {
        let reader = self.body_reader().await?;
        let config = if reader.is_passthrough() {
            config
        } else {
            config.with_charset_hook(assume_utf8)
        };
        Ok(config.decoder(reader)?)
    }
}

async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, RetsError> {
    let body = LimitedBody::new(response.into_body(), limit);
    Ok(body.collect().await?.to_bytes())
}
