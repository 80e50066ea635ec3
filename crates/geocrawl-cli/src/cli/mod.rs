//! Command-line interface for geocrawl.

mod commands;
pub mod icons;

pub use commands::{is_verbose, run};
