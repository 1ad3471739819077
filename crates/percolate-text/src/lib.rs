//! percolate-text
//!
//! Tantivy-based analysis and the single-document matcher: documents are
//! analyzed into an in-memory evaluation context and each registered query is
//! tested against it.
pub mod context;
pub mod datemath;
pub mod eval;
pub mod matcher;
pub mod tantivy_utils;

pub use matcher::{MatchOptions, PercolateMatcher};
pub use tantivy_utils::{Analyzer, AnalyzerKind};
