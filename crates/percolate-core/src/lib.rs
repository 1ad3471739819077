//! percolate-core
//!
//! Data model, query DSL, content decoding, collaborator traits, errors and
//! configuration shared by the percolation crates.
pub mod config;
pub mod content;
pub mod error;
pub mod query;
pub mod traits;
pub mod types;

pub use content::{CanonicalDoc, ContentFormat, DecodeError};
pub use error::{Error, Result, Status};
pub use query::{Query, QueryError, QuerySource};
