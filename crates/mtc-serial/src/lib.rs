//! MTC Serialized Values
//!
//! Byte-exact codec for PHP-serialized column values and the substring
//! rewriter used when a tenant's data is cloned under a new identity.
//!
//! # Core Concepts
//!
//! - [`SerializedValue`]: decoded tree (`Scalar | Sequence | Mapping | Record | Unresolvable`)
//! - [`decode`] / [`encode`]: strict codec, `encode(decode(s)) == s`
//! - [`ValueRewriter`]: replaces a substring in every leaf string, re-encoding
//!   so declared lengths stay correct, across at most two encoding layers
//!
//! # Example
//!
//! ```rust
//! use mtc_serial::rewrite;
//!
//! let raw = "a:1:{s:4:\"home\";s:18:\"https://old.test/a\";}";
//! let out = rewrite(raw, "https://old.test/a", "https://new.test/shop").unwrap();
//! assert_eq!(out, "a:1:{s:4:\"home\";s:21:\"https://new.test/shop\";}");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod decode;
mod encode;
mod error;
mod rewrite;
mod value;

pub use decode::{decode, decode_with, looks_serialized, MAX_DEPTH};
pub use encode::encode;
pub use error::DecodeError;
pub use rewrite::{encoding_depth, replace_plain, rewrite, EncodingDepth, ValueRewriter};
pub use value::{ArrayKey, ClassResolver, ObjectBody, Opaque, Scalar, SerializedValue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
