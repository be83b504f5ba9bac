//! leafdoc command-line front end.

pub mod config;
pub mod render;
pub mod repl;
