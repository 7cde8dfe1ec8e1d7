use thiserror::Error;

/// Errors produced while decoding a RETS XML payload.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// The document is not well-formed (strict mode) or is too broken to
    /// continue even in lenient mode.
    #[error("XML syntax error at byte {position}: {source}")]
    Syntax {
        /// Byte offset in the filtered, UTF-8 stream
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    /// The XML declaration names an encoding the charset hook does not know.
    #[error("XML declares unsupported encoding '{label}'")]
    UnknownEncoding { label: String },

    /// End of document reached with elements still open (strict mode only).
    #[error("element <{name}> is not closed at end of document (byte {position})")]
    Unclosed { position: u64, name: String },

    /// Reading the underlying stream failed.
    #[error("I/O error while reading XML: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Byte offset associated with the error, when known.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::Syntax { position, .. } | Self::Unclosed { position, .. } => Some(*position),
            Self::UnknownEncoding { .. } | Self::Io(_) => None,
        }
    }
}
