//! Error types for the serialized value codec

/// Errors raised while decoding a serialized payload
///
/// Every variant carries the byte offset where decoding stopped so callers
/// can log something actionable for the offending row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Input ended in the middle of a value
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof { offset: usize },

    /// A structural byte did not match what the format requires
    #[error("expected {expected} at byte {offset}, found {found:?}")]
    Unexpected {
        offset: usize,
        expected: &'static str,
        found: char,
    },

    /// A length, count or integer field is not in canonical form
    #[error("invalid {what} at byte {offset}")]
    InvalidNumber { offset: usize, what: &'static str },

    /// Declared string length overruns the input or splits a UTF-8 sequence
    #[error("declared length {declared} at byte {offset} does not fit the input")]
    BadLength { offset: usize, declared: usize },

    /// Type tag not handled by this codec (e.g. legacy escaped `S:` strings)
    #[error("unsupported type tag {tag:?} at byte {offset}")]
    UnsupportedTag { offset: usize, tag: char },

    /// Bytes left over after a complete value
    #[error("trailing data at byte {offset}")]
    TrailingData { offset: usize },

    /// Composite nesting exceeds the decoder limit
    #[error("nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
}

impl DecodeError {
    /// Byte offset the error refers to, if any
    #[inline]
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::UnexpectedEof { offset }
            | Self::Unexpected { offset, .. }
            | Self::InvalidNumber { offset, .. }
            | Self::BadLength { offset, .. }
            | Self::UnsupportedTag { offset, .. }
            | Self::TrailingData { offset } => Some(*offset),
            Self::TooDeep { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let err = DecodeError::BadLength {
            offset: 4,
            declared: 12,
        };
        assert_eq!(
            err.to_string(),
            "declared length 12 at byte 4 does not fit the input"
        );
    }

    #[test]
    fn decode_error_offset() {
        assert_eq!(DecodeError::TrailingData { offset: 9 }.offset(), Some(9));
        assert_eq!(DecodeError::TooDeep { limit: 8 }.offset(), None);
    }
}
