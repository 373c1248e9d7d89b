//! Substring rewriting that keeps serialized payloads valid
//!
//! Plain strings get a literal replace. Serialized payloads are decoded (at
//! most twice), every leaf string is rewritten, and the tree is encoded again
//! so each declared length matches the new content.

use crate::decode::{decode_with, is_blank, looks_serialized, trim_blank};
use crate::error::DecodeError;
use crate::value::{ClassResolver, Scalar, SerializedValue};
use std::borrow::Cow;

/// How many times a stored value was serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncodingDepth {
    /// Stored as-is
    Plain,
    /// Serialized once
    Single,
    /// A serialized string whose content is itself serialized
    Double,
}

/// Detect how many encoding layers a stored value carries
///
/// # Errors
/// Returns [`DecodeError`] if a layer looks serialized but fails to decode.
pub fn encoding_depth(raw: &str) -> Result<EncodingDepth, DecodeError> {
    let resolver = ClassResolver::default();
    if !looks_serialized(raw) {
        return Ok(EncodingDepth::Plain);
    }
    match decode_with(trim_blank(raw), &resolver)? {
        SerializedValue::Scalar(Scalar::Str(inner)) if looks_serialized(&inner) => {
            decode_with(trim_blank(&inner), &resolver)?;
            Ok(EncodingDepth::Double)
        }
        _ => Ok(EncodingDepth::Single),
    }
}

/// Literal replace on a plain string
///
/// Returns the input unchanged when `to` already occurs in it, so applying the
/// same substitution twice never stacks (`wp_` → `wp_2_` must not yield
/// `wp_2_2_`). An empty `from` never matches.
#[must_use]
pub fn replace_plain<'a>(value: &'a str, from: &str, to: &str) -> Cow<'a, str> {
    if from.is_empty() || value.contains(to) || !value.contains(from) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(value.replace(from, to))
    }
}

/// Rewrites stored column values
#[derive(Debug, Clone, Default)]
pub struct ValueRewriter {
    resolver: ClassResolver,
}

impl ValueRewriter {
    /// Create rewriter with the default class resolver
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create rewriter with a custom class resolver
    #[inline]
    #[must_use]
    pub fn with_resolver(resolver: ClassResolver) -> Self {
        Self { resolver }
    }

    /// Replace `from` with `to` in a stored value
    ///
    /// Returns `Cow::Borrowed` when nothing changed.
    ///
    /// # Errors
    /// Returns [`DecodeError`] when the value (or a nested string inside it)
    /// looks serialized but does not decode. Callers are expected to leave
    /// such values untouched.
    pub fn rewrite<'a>(
        &self,
        raw: &'a str,
        from: &str,
        to: &str,
    ) -> Result<Cow<'a, str>, DecodeError> {
        if !looks_serialized(raw) {
            return Ok(replace_plain(raw, from, to));
        }

        let (lead, core, trail) = split_whitespace(raw);
        let mut value = decode_with(core, &self.resolver)?;

        let mut outer_ws = None;
        if let Some(inner) = value.as_str().filter(|s| looks_serialized(s)) {
            let (inner_lead, inner_core, inner_trail) = split_whitespace(inner);
            let decoded = decode_with(inner_core, &self.resolver)?;
            outer_ws = Some((inner_lead.to_string(), inner_trail.to_string()));
            value = decoded;
        }

        match &mut value {
            SerializedValue::Scalar(Scalar::Str(s)) => {
                if let Some(new) = changed(replace_plain(s, from, to)) {
                    *s = new;
                }
            }
            node => self.rewrite_children(node, from, to)?,
        }

        let mut encoded = value.to_string();
        if let Some((inner_lead, inner_trail)) = outer_ws {
            encoded = SerializedValue::string(format!("{inner_lead}{encoded}{inner_trail}"))
                .to_string();
        }

        if encoded == core {
            Ok(Cow::Borrowed(raw))
        } else {
            Ok(Cow::Owned(format!("{lead}{encoded}{trail}")))
        }
    }

    /// Rewrite every child of a composite node
    ///
    /// Child strings go back through [`Self::rewrite`], so a serialized blob
    /// stored inside an array element is decoded and rewritten as well.
    fn rewrite_children(
        &self,
        node: &mut SerializedValue,
        from: &str,
        to: &str,
    ) -> Result<(), DecodeError> {
        if let SerializedValue::Sequence(items) = node {
            for item in items {
                self.rewrite_child(item, from, to)?;
            }
        } else if let Some(fields) = node.fields_mut() {
            for (_, child) in fields {
                self.rewrite_child(child, from, to)?;
            }
        }
        Ok(())
    }

    fn rewrite_child(
        &self,
        child: &mut SerializedValue,
        from: &str,
        to: &str,
    ) -> Result<(), DecodeError> {
        match child {
            SerializedValue::Scalar(Scalar::Str(s)) => {
                if let Some(new) = changed(self.rewrite(s, from, to)?) {
                    *s = new;
                }
                Ok(())
            }
            node if node.is_composite() => self.rewrite_children(node, from, to),
            _ => Ok(()),
        }
    }
}

/// Rewrite with the default class resolver
///
/// # Errors
/// See [`ValueRewriter::rewrite`].
pub fn rewrite<'a>(raw: &'a str, from: &str, to: &str) -> Result<Cow<'a, str>, DecodeError> {
    ValueRewriter::new().rewrite(raw, from, to)
}

fn changed(value: Cow<'_, str>) -> Option<String> {
    match value {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    }
}

fn split_whitespace(raw: &str) -> (&str, &str, &str) {
    let start = raw.len() - raw.trim_start_matches(is_blank).len();
    let end = raw.trim_end_matches(is_blank).len();
    if start >= end {
        return ("", raw, "");
    }
    (&raw[..start], &raw[start..end], &raw[end..])
}
