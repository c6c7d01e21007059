//! # contract: interface to the remote document store
//!
//! This module defines the [`RemoteStore`] trait and the plain data types it
//! exchanges. The engine only ever talks to the remote through this trait,
//! which keeps the reconciler free of transport and vendor details.
//!
//! ## Implementors
//! - The HTTP client in the `tree-sync` crate (the real remote).
//! - [`crate::client::RemoteClient`], which wraps any store with rate
//!   limiting and retries and is itself a store.
//! - `MockRemoteStore`, generated by `mockall` for tests.
//!
//! ## Error contract
//! Implementors translate remote payloads into [`RemoteError`]; the reconciler
//! relies on `NotFound` and `ArchivedAncestor` being reported distinctly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::RemoteError;
use crate::node::{Block, Row, Schema};

/// Opaque identity assigned by the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn new(id: impl Into<String>) -> Self {
        RemoteRef(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteRef {
    fn from(s: &str) -> Self {
        RemoteRef(s.to_string())
    }
}

/// A dataset's identity plus the identity its rows are parented under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset: RemoteRef,
    pub rows: RemoteRef,
}

/// What a child entry under a container is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Page,
    Dataset,
}

/// A child entry found under a remote container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChild {
    pub id: RemoteRef,
    pub title: String,
    pub kind: ChildKind,
}

/// An existing remote dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataset {
    pub reference: DatasetRef,
    pub schema: Schema,
}

/// A row returned by the batched dataset query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRow {
    pub id: RemoteRef,
    pub title: String,
}

/// Primitive operations over the remote document graph.
///
/// Mutating calls are `create_*`, `overwrite_*`, `append_body` and
/// `archive`; everything else is a read.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Children of `parent` whose title equals `title`, in remote order.
    async fn find_children(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<Vec<RemoteChild>, RemoteError>;

    /// Create a body-less container page.
    async fn create_container(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<RemoteRef, RemoteError>;

    /// Create a document page with the given body.
    async fn create_document(
        &self,
        parent: &RemoteRef,
        title: &str,
        body: &[Block],
    ) -> Result<RemoteRef, RemoteError>;

    /// Replace the body of an existing document (or row page).
    /// Child pages and datasets under it are left alone.
    async fn overwrite_document(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError>;

    /// Append blocks to the end of a document-like entity.
    async fn append_body(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError>;

    /// Archive (delete) an entity and everything beneath it.
    async fn archive(&self, id: &RemoteRef) -> Result<(), RemoteError>;

    /// Create a dataset with its schema.
    async fn create_dataset(
        &self,
        parent: &RemoteRef,
        title: &str,
        schema: &Schema,
    ) -> Result<DatasetRef, RemoteError>;

    /// Re-assert an existing dataset's title and columns.
    async fn overwrite_dataset(
        &self,
        dataset: &DatasetRef,
        title: &str,
        schema: &Schema,
    ) -> Result<(), RemoteError>;

    /// Read a dataset's identities and current schema.
    async fn retrieve_dataset(&self, id: &RemoteRef) -> Result<RemoteDataset, RemoteError>;

    /// Every row of a dataset in one logical query.
    async fn query_rows(&self, dataset: &DatasetRef) -> Result<Vec<RemoteRow>, RemoteError>;

    /// Create a row from its column values.
    async fn create_row(
        &self,
        dataset: &DatasetRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<RemoteRef, RemoteError>;

    /// Overwrite a row's column values.
    async fn overwrite_row(
        &self,
        id: &RemoteRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<(), RemoteError>;
}
