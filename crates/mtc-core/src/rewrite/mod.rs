//! Reference rewriting
//!
//! - [`RowRewriter`]: one column, one substitution
//! - [`ReferenceRewritePass`]: every designated column of a cloned tenant,
//!   every substitution, in map order

mod pass;
mod row;

pub use pass::{ReferenceRewritePass, RewriteInputs, RewritePlan, RewriteReport};
pub use row::{ColumnReport, RowRewriter};
