//! Sparse-checkout filtering: pattern/cone matching, presets, and the
//! filtered filesystem view.

pub mod glob;
mod matcher;
mod presets;
mod wrapper;

pub use glob::GlobPattern;
pub use matcher::SparseMatcher;
pub use presets::{Preset, PresetRegistry};
pub use wrapper::SparseFs;
