//! Strict decoder for PHP-serialized payloads
//!
//! The decoder accepts exactly the canonical text `serialize()` produces, so
//! that `encode(decode(s)) == s` holds for every input it accepts. Anything
//! else (leading `+` on integers, zero-padded lengths, legacy `S:` strings) is
//! rejected rather than normalized.

use crate::error::DecodeError;
use crate::value::{ArrayKey, ClassResolver, ObjectBody, Opaque, Scalar, SerializedValue};

/// Maximum composite nesting accepted by the decoder
pub const MAX_DEPTH: usize = 512;

/// Decode a payload with the default class resolver
///
/// # Errors
/// Returns [`DecodeError`] if `input` is not one complete canonical value.
pub fn decode(input: &str) -> Result<SerializedValue, DecodeError> {
    decode_with(input, &ClassResolver::default())
}

/// Decode a payload, classifying objects with `resolver`
///
/// # Errors
/// Returns [`DecodeError`] if `input` is not one complete canonical value.
pub fn decode_with(input: &str, resolver: &ClassResolver) -> Result<SerializedValue, DecodeError> {
    let mut decoder = Decoder {
        input,
        pos: 0,
        depth: 0,
        resolver,
    };
    let value = decoder.value()?;
    if decoder.pos != input.len() {
        return Err(DecodeError::TrailingData {
            offset: decoder.pos,
        });
    }
    Ok(value)
}

/// Cheap check for whether a string is shaped like a serialized payload
///
/// Mirrors the heuristic the hosting platform uses before attempting to
/// unserialize a stored value: surrounding whitespace is ignored, the value
/// must start with a known tag followed by `:` and end with `;` or `}`.
/// A `true` result does not guarantee [`decode`] succeeds.
#[must_use]
pub fn looks_serialized(data: &str) -> bool {
    let data = trim_blank(data);
    if data == "N;" {
        return true;
    }
    let b = data.as_bytes();
    if b.len() < 4 || b[1] != b':' {
        return false;
    }
    let last = b[b.len() - 1];
    if last != b';' && last != b'}' {
        return false;
    }
    match b[0] {
        b's' => b[b.len() - 2] == b'"' && has_length_prefix(&b[2..]),
        b'a' | b'O' | b'C' | b'E' => has_length_prefix(&b[2..]),
        b'b' | b'i' | b'd' => {
            last == b';'
                && b[2..b.len() - 1]
                    .iter()
                    .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'E' | b'+' | b'-'))
        }
        _ => false,
    }
}

/// Characters the hosting platform's `trim` strips: ASCII blanks and NUL
pub(crate) fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B')
}

pub(crate) fn trim_blank(s: &str) -> &str {
    s.trim_matches(is_blank)
}

fn has_length_prefix(rest: &[u8]) -> bool {
    let digits = rest.iter().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && rest.get(digits) == Some(&b':')
}

struct Decoder<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    resolver: &'a ClassResolver,
}

impl<'a> Decoder<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn next(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes()
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8, expected: &'static str) -> Result<(), DecodeError> {
        let offset = self.pos;
        let b = self.next()?;
        if b == want {
            Ok(())
        } else {
            Err(DecodeError::Unexpected {
                offset,
                expected,
                found: char::from(b),
            })
        }
    }

    /// Consume up to (and including) `term`, returning the text before it
    fn until(&mut self, term: u8) -> Result<&'a str, DecodeError> {
        let start = self.pos;
        let rel = self.bytes()[start..]
            .iter()
            .position(|&b| b == term)
            .ok_or(DecodeError::UnexpectedEof {
                offset: self.input.len(),
            })?;
        self.pos = start + rel + 1;
        // `term` is ASCII so the slice ends on a char boundary
        Ok(&self.input[start..start + rel])
    }

    fn length(&mut self, term: u8, what: &'static str) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let text = self.until(term)?;
        if !is_canonical_unsigned(text) {
            return Err(DecodeError::InvalidNumber { offset, what });
        }
        text.parse()
            .map_err(|_| DecodeError::InvalidNumber { offset, what })
    }

    /// Canonical decimal integer text up to `term`
    fn integer_text(&mut self, term: u8) -> Result<(usize, &'a str), DecodeError> {
        let offset = self.pos;
        let text = self.until(term)?;
        let digits = text.strip_prefix('-').unwrap_or(text);
        if !is_canonical_unsigned(digits) || text == "-0" {
            return Err(DecodeError::InvalidNumber {
                offset,
                what: "integer",
            });
        }
        Ok((offset, text))
    }

    fn integer(&mut self, term: u8) -> Result<i64, DecodeError> {
        let (offset, text) = self.integer_text(term)?;
        text.parse().map_err(|_| DecodeError::InvalidNumber {
            offset,
            what: "integer",
        })
    }

    /// Integer scalar; payloads written on wider platforms keep their text
    fn int_scalar(&mut self) -> Result<Scalar, DecodeError> {
        let (_, text) = self.integer_text(b';')?;
        Ok(text
            .parse()
            .map_or_else(|_| Scalar::WideInt(text.to_string()), Scalar::Int))
    }

    /// `"<len bytes>"`
    fn quoted(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        self.expect(b'"', "'\"'")?;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .ok_or(DecodeError::BadLength {
                offset: start,
                declared: len,
            })?;
        let text = self.input.get(start..end).ok_or(DecodeError::BadLength {
            offset: start,
            declared: len,
        })?;
        self.pos = end;
        self.expect(b'"', "'\"'")?;
        Ok(text)
    }

    fn value(&mut self) -> Result<SerializedValue, DecodeError> {
        let offset = self.pos;
        let tag = self.next()?;
        if tag == b'N' {
            self.expect(b';', "';'")?;
            return Ok(SerializedValue::Scalar(Scalar::Null));
        }
        self.expect(b':', "':'")?;

        match tag {
            b'b' => {
                let flag_at = self.pos;
                let flag = match self.next()? {
                    b'0' => false,
                    b'1' => true,
                    other => {
                        return Err(DecodeError::Unexpected {
                            offset: flag_at,
                            expected: "'0' or '1'",
                            found: char::from(other),
                        })
                    }
                };
                self.expect(b';', "';'")?;
                Ok(SerializedValue::Scalar(Scalar::Bool(flag)))
            }
            b'i' => Ok(SerializedValue::Scalar(self.int_scalar()?)),
            b'd' => {
                let at = self.pos;
                let raw = self.until(b';')?;
                if !is_float_literal(raw) {
                    return Err(DecodeError::InvalidNumber {
                        offset: at,
                        what: "float",
                    });
                }
                Ok(SerializedValue::Scalar(Scalar::Float(raw.to_string())))
            }
            b's' => {
                let len = self.length(b':', "string length")?;
                let text = self.quoted(len)?;
                self.expect(b';', "';'")?;
                Ok(SerializedValue::string(text))
            }
            b'a' => {
                let count = self.length(b':', "element count")?;
                let entries = self.entries(count)?;
                Ok(SerializedValue::array(entries))
            }
            b'O' => {
                let len = self.length(b':', "class name length")?;
                let class = self.quoted(len)?;
                self.expect(b':', "':'")?;
                let count = self.length(b':', "property count")?;
                let fields = self.entries(count)?;
                let body = ObjectBody::new(class, fields);
                if self.resolver.resolves(class) {
                    Ok(SerializedValue::Record(body))
                } else {
                    Ok(SerializedValue::Unresolvable(body))
                }
            }
            b'C' => {
                let len = self.length(b':', "class name length")?;
                let class = self.quoted(len)?.to_string();
                self.expect(b':', "':'")?;
                let payload_len = self.length(b':', "payload length")?;
                self.expect(b'{', "'{'")?;
                let start = self.pos;
                let payload = self
                    .input
                    .get(start..start.saturating_add(payload_len))
                    .ok_or(DecodeError::BadLength {
                        offset: start,
                        declared: payload_len,
                    })?
                    .to_string();
                self.pos = start + payload_len;
                self.expect(b'}', "'}'")?;
                Ok(SerializedValue::Opaque(Opaque::Custom { class, payload }))
            }
            b'E' => {
                let len = self.length(b':', "enum name length")?;
                let name = self.quoted(len)?.to_string();
                self.expect(b';', "';'")?;
                Ok(SerializedValue::Opaque(Opaque::Enum { name }))
            }
            b'r' | b'R' => {
                let index = self.length(b';', "reference index")? as u64;
                Ok(SerializedValue::Opaque(if tag == b'r' {
                    Opaque::ObjectRef { index }
                } else {
                    Opaque::VarRef { index }
                }))
            }
            other => Err(DecodeError::UnsupportedTag {
                offset,
                tag: char::from(other),
            }),
        }
    }

    /// `{<key><value>...}` with exactly `count` pairs
    fn entries(&mut self, count: usize) -> Result<Vec<(ArrayKey, SerializedValue)>, DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep { limit: MAX_DEPTH });
        }
        self.expect(b'{', "'{'")?;
        // Cap the preallocation; `count` comes from untrusted input
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.key()?;
            let value = self.value()?;
            entries.push((key, value));
        }
        self.expect(b'}', "'}'")?;
        self.depth -= 1;
        Ok(entries)
    }

    fn key(&mut self) -> Result<ArrayKey, DecodeError> {
        let offset = self.pos;
        match self.next()? {
            b'i' => {
                self.expect(b':', "':'")?;
                Ok(ArrayKey::Int(self.integer(b';')?))
            }
            b's' => {
                self.expect(b':', "':'")?;
                let len = self.length(b':', "key length")?;
                let text = self.quoted(len)?;
                self.expect(b';', "';'")?;
                Ok(ArrayKey::Str(text.to_string()))
            }
            other => Err(DecodeError::Unexpected {
                offset,
                expected: "integer or string key",
                found: char::from(other),
            }),
        }
    }
}

fn is_canonical_unsigned(text: &str) -> bool {
    !text.is_empty()
        && text.bytes().all(|b| b.is_ascii_digit())
        && (text == "0" || !text.starts_with('0'))
}

fn is_float_literal(raw: &str) -> bool {
    matches!(raw, "INF" | "-INF" | "NAN")
        || (!raw.is_empty()
            && raw.bytes().any(|b| b.is_ascii_digit())
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-')))
}
