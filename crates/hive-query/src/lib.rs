//! Filter and update expression evaluation for document collections.
//!
//! Pure functions over JSON documents: match a document against a filter
//! expression, apply an update expression, and post-process result sets
//! (sort + pagination). Persistence is a caller concern; these functions
//! never touch storage.

mod filter;
mod options;
mod update;

pub use filter::matches;
pub use options::{FindOptions, SortOrder, apply_options};
pub use update::apply_update;

/// A document: an insertion-ordered mapping of field name to JSON value.
pub type Document = serde_json::Map<String, serde_json::Value>;
