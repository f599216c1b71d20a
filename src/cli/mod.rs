//! Command-line interface for docsift.

mod commands;
pub mod icons;
pub mod summary;

pub use commands::{is_verbose, run};
