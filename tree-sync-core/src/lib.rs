#![doc = "tree-sync-core: sync engine for mirroring a local content tree into a remote document store."]

//! This crate holds the engine only: the local tree model, fingerprints, the
//! persistent cache, the [`contract::RemoteStore`] seam, rate limiting and
//! retries, and the reconciler. Loading content from disk and talking HTTP
//! live in the `tree-sync` crate.
//!
//! # Usage
//! Build a [`node::LocalNode`] tree, wrap a store in [`client::RemoteClient`],
//! load a [`cache::CacheStore`] and call [`synchronise::synchronise`].

pub mod cache;
pub mod client;
pub mod contract;
mod dataset;
pub mod error;
pub mod node;
pub mod normalize;
pub mod reconcile;
pub mod retry;
pub mod synchronise;
pub mod throttle;

pub use cache::{CacheEntry, CacheStore};
pub use client::RemoteClient;
pub use contract::{RemoteRef, RemoteStore};
pub use error::{CacheError, RemoteError, SyncError};
pub use node::{LocalNode, NodePath};
pub use synchronise::{synchronise, Action, SyncMode, SyncOptions, SyncReport};
