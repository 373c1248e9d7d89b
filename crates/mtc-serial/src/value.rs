//! Serialized value model
//!
//! A decoded payload is a tree of [`SerializedValue`] nodes. The tree keeps
//! enough of the original text (raw float literals, opaque custom payloads,
//! class names) that encoding it again reproduces the input byte for byte.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Leaf scalar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    /// `N;`
    Null,
    /// `b:0;` / `b:1;`
    Bool(bool),
    /// `i:<n>;`
    Int(i64),
    /// `i:<n>;` outside the 64-bit range, kept as written
    WideInt(String),
    /// `d:<literal>;` kept as written so precision never drifts
    Float(String),
    /// `s:<len>:"<bytes>";`
    Str(String),
}

/// Key of an array entry or object property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ArrayKey {
    /// Integer key
    Int(i64),
    /// String key (object properties may carry NUL-delimited visibility markers)
    Str(String),
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Body of an object record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectBody {
    /// Class name as written in the payload
    pub class: String,
    /// Properties in payload order
    pub fields: Vec<(ArrayKey, SerializedValue)>,
}

impl ObjectBody {
    /// Create an object body
    #[inline]
    #[must_use]
    pub fn new(class: impl Into<String>, fields: Vec<(ArrayKey, SerializedValue)>) -> Self {
        Self {
            class: class.into(),
            fields,
        }
    }

    /// Look up a property by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SerializedValue> {
        self.fields.iter().find_map(|(k, v)| match k {
            ArrayKey::Str(s) if s == name => Some(v),
            _ => None,
        })
    }
}

/// Payload carried through without interpretation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Opaque {
    /// `C:<len>:"<class>":<len>:{<payload>}` custom-serialized object
    Custom { class: String, payload: String },
    /// `E:<len>:"<Enum:Case>";`
    Enum { name: String },
    /// `r:<n>;` object reference
    ObjectRef { index: u64 },
    /// `R:<n>;` variable reference
    VarRef { index: u64 },
}

/// Decoded serialized value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SerializedValue {
    /// Leaf scalar
    Scalar(Scalar),
    /// Array whose keys are exactly `0..n` in order
    Sequence(Vec<SerializedValue>),
    /// Any other array
    Mapping(Vec<(ArrayKey, SerializedValue)>),
    /// Object whose class the resolver knows
    Record(ObjectBody),
    /// Object whose class cannot be resolved locally, handled as a field bag
    Unresolvable(ObjectBody),
    /// Leaf carried through verbatim
    Opaque(Opaque),
}

impl SerializedValue {
    /// Shorthand for a string scalar
    #[inline]
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Str(s.into()))
    }

    /// Build an array node, choosing `Sequence` when keys are `0..n` in order
    #[must_use]
    pub fn array(entries: Vec<(ArrayKey, SerializedValue)>) -> Self {
        let sequential = entries
            .iter()
            .enumerate()
            .all(|(i, (k, _))| matches!(k, ArrayKey::Int(n) if usize::try_from(*n) == Ok(i)));
        if sequential {
            Self::Sequence(entries.into_iter().map(|(_, v)| v).collect())
        } else {
            Self::Mapping(entries)
        }
    }

    /// Get the string content if this is a string scalar
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Key/value entries of the map-like variants
    ///
    /// `Mapping`, `Record` and `Unresolvable` all expose their entries through
    /// this one accessor so recursion treats them alike.
    #[inline]
    pub fn fields_mut(&mut self) -> Option<&mut Vec<(ArrayKey, SerializedValue)>> {
        match self {
            Self::Mapping(entries) => Some(entries),
            Self::Record(body) | Self::Unresolvable(body) => Some(&mut body.fields),
            _ => None,
        }
    }

    /// Read-only counterpart of [`Self::fields_mut`]
    #[inline]
    #[must_use]
    pub fn fields(&self) -> Option<&[(ArrayKey, SerializedValue)]> {
        match self {
            Self::Mapping(entries) => Some(entries),
            Self::Record(body) | Self::Unresolvable(body) => Some(&body.fields),
            _ => None,
        }
    }

    /// Whether the node holds children
    #[inline]
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Sequence(_) | Self::Mapping(_) | Self::Record(_) | Self::Unresolvable(_)
        )
    }

    /// Nesting depth (leaves are depth 0)
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Sequence(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            _ => match self.fields() {
                Some(fields) => 1 + fields.iter().map(|(_, v)| v.depth()).max().unwrap_or(0),
                None => 0,
            },
        }
    }
}

/// Decides whether an object class counts as locally known
///
/// Known classes decode to [`SerializedValue::Record`], everything else to
/// [`SerializedValue::Unresolvable`]. Both encode identically.
#[derive(Debug, Clone)]
pub struct ClassResolver {
    known: HashSet<String>,
}

impl ClassResolver {
    /// Resolver that knows only `stdClass`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a known class
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.known.insert(class.into());
        self
    }

    /// Add several known classes
    #[must_use]
    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(classes.into_iter().map(Into::into));
        self
    }

    /// Check whether a class is known
    #[inline]
    #[must_use]
    pub fn resolves(&self, class: &str) -> bool {
        self.known.contains(class)
    }
}

impl Default for ClassResolver {
    fn default() -> Self {
        Self {
            known: HashSet::from(["stdClass".to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_picks_sequence_for_dense_keys() {
        let v = SerializedValue::array(vec![
            (ArrayKey::Int(0), SerializedValue::string("a")),
            (ArrayKey::Int(1), SerializedValue::string("b")),
        ]);
        assert!(matches!(v, SerializedValue::Sequence(ref items) if items.len() == 2));
    }

    #[test]
    fn array_picks_mapping_for_sparse_keys() {
        let v = SerializedValue::array(vec![
            (ArrayKey::Int(1), SerializedValue::string("a")),
            (ArrayKey::Str("k".into()), SerializedValue::string("b")),
        ]);
        assert!(matches!(v, SerializedValue::Mapping(_)));
    }

    #[test]
    fn depth_counts_levels() {
        let inner = SerializedValue::Sequence(vec![SerializedValue::string("x")]);
        let outer = SerializedValue::Record(ObjectBody::new(
            "stdClass",
            vec![(ArrayKey::Str("inner".into()), inner)],
        ));
        assert_eq!(outer.depth(), 2);
        assert_eq!(SerializedValue::string("x").depth(), 0);
    }

    #[test]
    fn resolver_defaults_to_std_class() {
        let resolver = ClassResolver::new().with_class("WP_Theme");
        assert!(resolver.resolves("stdClass"));
        assert!(resolver.resolves("WP_Theme"));
        assert!(!resolver.resolves("Missing_Plugin_Class"));
    }
}
