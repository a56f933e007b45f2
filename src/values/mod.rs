//! Layered values: six ordered layers per module, deep-merged into the
//! effective values handed to hooks and Helm.

pub mod error;
pub mod merge;
pub mod store;

pub use error::ValuesError;
pub use merge::{deep_merge, merge_layers};
pub use store::{LayerKind, Scope, ValueStore, load_values_file, parse_values};
