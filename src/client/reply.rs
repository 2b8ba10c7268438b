//! Owned reply values assembled from decoded tokens.
//!
//! A [`Reply`] owns its payloads as `Bytes`, which keeps single-segment
//! values zero-copy: the `Bytes` handle shares the connection's receive
//! buffers instead of copying out of them.

use crate::error::ProtocolError;
use bytes::Bytes;

/// One complete RESP reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple string (`+`)
    Simple(Bytes),
    /// Error reply (`-`)
    Error(Bytes),
    /// 64-bit signed integer (`:`)
    Integer(i64),
    /// Bulk string payload (`$`), binary-safe
    Bulk(Bytes),
    /// Null bulk string or null array
    Null,
    /// Array (`*`)
    Array(Vec<Reply>),
    /// Map (`%`, RESP3)
    Map(Vec<(Reply, Reply)>),
    /// Set (`~`, RESP3)
    Set(Vec<Reply>),
    /// Out-of-band push (`>`, RESP3)
    Push(Vec<Reply>),
    /// Double (`,`, RESP3)
    Double(f64),
    /// Boolean (`#`, RESP3)
    Boolean(bool),
    /// Big number (`(`, RESP3), kept as its decimal digits
    BigNumber(Bytes),
    /// Verbatim string (`=`, RESP3)
    Verbatim {
        /// Three-byte encoding tag, e.g. `txt` or `mkd`
        format: [u8; 3],
        /// Payload after the tag and colon
        data: Bytes,
    },
    /// A reply annotated with attributes (`|`, RESP3)
    Attribute {
        /// The attribute pairs
        attrs: Vec<(Reply, Reply)>,
        /// The annotated reply
        value: Box<Reply>,
    },
}

impl Reply {
    /// Check if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if this is a null reply.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The error message, if this is an error reply.
    pub fn as_error(&self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(String::from_utf8_lossy(msg).into_owned()),
            _ => None,
        }
    }

    /// The reply as a string slice, for simple and bulk strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Simple(b) | Self::Error(b) | Self::Bulk(b) | Self::BigNumber(b) => {
                std::str::from_utf8(b).ok()
            }
            Self::Verbatim { data, .. } => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// The reply payload as bytes, for string-like replies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Simple(b) | Self::Error(b) | Self::Bulk(b) | Self::BigNumber(b) => Some(b),
            Self::Verbatim { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The reply as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Strips attribute annotations, returning the annotated value.
    pub fn into_value(self) -> Reply {
        match self {
            Self::Attribute { value, .. } => *value,
            other => other,
        }
    }
}

/// Splits a verbatim-string payload into its encoding tag and data.
pub(crate) fn split_verbatim(payload: Bytes) -> Result<([u8; 3], Bytes), ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::LengthOutOfRange(payload.len() as i64));
    }
    if payload[3] != b':' {
        return Err(ProtocolError::UnexpectedControlByte {
            byte: payload[3],
            offset: 3,
        });
    }
    let format = [payload[0], payload[1], payload[2]];
    Ok((format, payload.slice(4..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let reply = Reply::Bulk(Bytes::from_static(b"hello"));
        assert_eq!(reply.as_str(), Some("hello"));
        assert_eq!(reply.as_bytes(), Some(&b"hello"[..]));
        assert!(!reply.is_error());

        let err = Reply::Error(Bytes::from_static(b"ERR nope"));
        assert!(err.is_error());
        assert_eq!(err.as_error().as_deref(), Some("ERR nope"));

        assert_eq!(Reply::Integer(5).as_integer(), Some(5));
        assert_eq!(Reply::Boolean(true).as_integer(), Some(1));
        assert!(Reply::Null.is_null());
    }

    #[test]
    fn test_split_verbatim() {
        let (format, data) = split_verbatim(Bytes::from_static(b"txt:Some string")).unwrap();
        assert_eq!(&format, b"txt");
        assert_eq!(data.as_ref(), b"Some string");
    }

    #[test]
    fn test_split_verbatim_rejects_short_and_untagged() {
        assert!(split_verbatim(Bytes::from_static(b"tx")).is_err());
        assert!(split_verbatim(Bytes::from_static(b"txtx")).is_err());
    }

    #[test]
    fn test_into_value_unwraps_attributes() {
        let annotated = Reply::Attribute {
            attrs: vec![(
                Reply::Simple(Bytes::from_static(b"ttl")),
                Reply::Integer(3600),
            )],
            value: Box::new(Reply::Integer(42)),
        };
        assert_eq!(annotated.into_value(), Reply::Integer(42));
    }
}
