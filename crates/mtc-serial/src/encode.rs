//! Encoder producing canonical serialized text
//!
//! String lengths are always recomputed from the current content, which is
//! what keeps rewritten payloads consistent.

use crate::value::{ArrayKey, ObjectBody, Opaque, Scalar, SerializedValue};
use std::fmt::{self, Display, Formatter, Write};

/// Encode a value into serialized text
#[inline]
#[must_use]
pub fn encode(value: &SerializedValue) -> String {
    value.to_string()
}

fn write_str(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "s:{}:\"{}\";", s.len(), s)
}

fn write_key(f: &mut Formatter<'_>, key: &ArrayKey) -> fmt::Result {
    match key {
        ArrayKey::Int(i) => write!(f, "i:{i};"),
        ArrayKey::Str(s) => write_str(f, s),
    }
}

fn write_entries<'v>(
    f: &mut Formatter<'_>,
    count: usize,
    entries: impl Iterator<Item = (ArrayKey, &'v SerializedValue)>,
) -> fmt::Result {
    write!(f, "{count}:{{")?;
    for (key, value) in entries {
        write_key(f, &key)?;
        value.fmt(f)?;
    }
    f.write_char('}')
}

fn write_object(f: &mut Formatter<'_>, body: &ObjectBody) -> fmt::Result {
    write!(f, "O:{}:\"{}\":", body.class.len(), body.class)?;
    write_entries(
        f,
        body.fields.len(),
        body.fields.iter().map(|(k, v)| (k.clone(), v)),
    )
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("N;"),
            Self::Bool(b) => write!(f, "b:{};", u8::from(*b)),
            Self::Int(i) => write!(f, "i:{i};"),
            Self::WideInt(raw) => write!(f, "i:{raw};"),
            Self::Float(raw) => write!(f, "d:{raw};"),
            Self::Str(s) => write_str(f, s),
        }
    }
}

impl Display for Opaque {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom { class, payload } => write!(
                f,
                "C:{}:\"{}\":{}:{{{}}}",
                class.len(),
                class,
                payload.len(),
                payload
            ),
            Self::Enum { name } => write!(f, "E:{}:\"{}\";", name.len(), name),
            Self::ObjectRef { index } => write!(f, "r:{index};"),
            Self::VarRef { index } => write!(f, "R:{index};"),
        }
    }
}

impl Display for SerializedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => s.fmt(f),
            Self::Sequence(items) => {
                f.write_str("a:")?;
                write_entries(
                    f,
                    items.len(),
                    items.iter().enumerate().map(|(i, v)| {
                        (ArrayKey::Int(i64::try_from(i).unwrap_or(i64::MAX)), v)
                    }),
                )
            }
            Self::Mapping(entries) => {
                f.write_str("a:")?;
                write_entries(f, entries.len(), entries.iter().map(|(k, v)| (k.clone(), v)))
            }
            Self::Record(body) | Self::Unresolvable(body) => write_object(f, body),
            Self::Opaque(o) => o.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_byte_lengths() {
        assert_eq!(encode(&SerializedValue::string("café")), "s:5:\"café\";");
    }

    #[test]
    fn decode_encode_is_identity() {
        let samples = [
            "N;",
            "b:0;",
            "i:0;",
            "i:-9223372036854775808;",
            "d:1.0E+25;",
            "d:-INF;",
            "s:0:\"\";",
            "a:0:{}",
            "a:3:{i:0;s:1:\"a\";i:5;b:1;s:1:\"k\";N;}",
            "O:8:\"stdClass\":2:{s:3:\"url\";s:4:\"http\";s:4:\"\0*\0p\";i:1;}",
            "O:12:\"Missing_Type\":1:{s:4:\"list\";a:1:{i:0;r:1;}}",
            "C:11:\"ArrayObject\":21:{x:i:0;a:0:{};m:a:0:{}}",
            "E:11:\"Suit:Hearts\";",
            "a:1:{i:0;R:1;}",
        ];
        for sample in samples {
            let decoded = decode(sample).unwrap_or_else(|e| panic!("{sample}: {e}"));
            assert_eq!(encode(&decoded), sample);
        }
    }
}
