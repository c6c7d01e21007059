//! tree-sync: operator surface for the sync engine in `tree-sync-core`.
//!
//! Loads YAML configuration and local content, talks HTTP to the remote
//! document store and drives one sync run per configured collection.

pub mod cli;
pub mod content;
pub mod load_config;
pub mod remote;
pub mod render;

pub use cli::{run, Cli, Commands};
