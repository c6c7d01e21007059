//! High-level entrypoint: reconcile one collection tree against the remote.
//!
//! [`synchronise`] drives a [`Reconciler`] over a [`LocalNode`] tree, using a
//! per-collection [`CacheStore`], and returns a [`SyncReport`] listing the
//! outcome of every node.
//!
//! # Responsibilities
//! - Work on a copy of the cache: a real run writes it back, a dry run drops
//!   it so the file on disk is never touched
//! - Optionally clean the collection (archive its cached remote root and
//!   invalidate its cache entries) before syncing
//! - Save the cache once, at the end of a real run
//!
//! # Error Handling
//! Node failures never abort the run; they are recorded in the report. The
//! only error this function returns is a failure to save the cache file.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::contract::{RemoteRef, RemoteStore};
use crate::error::{CacheError, SyncError};
use crate::node::{LocalNode, NodeKind, NodePath};
use crate::reconcile::{Parent, Reconciler};

/// How unchanged content is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Mutate only when fingerprints differ.
    #[default]
    Diff,
    /// Always rewrite documents and datasets.
    Force,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Diff => f.write_str("diff"),
            SyncMode::Force => f.write_str("force"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Compute decisions without mutating the remote or persisting the cache.
    ///
    /// Decisions come from the cache, so a dry run cannot see that a cached
    /// entity was deleted remotely: a changed document whose cached id is
    /// gone previews as `Updated` where the real run reports `Created`.
    pub dry_run: bool,
    /// Archive the collection root and drop its cache entries first.
    pub clean: bool,
    /// Maximum nodes worked on at once across sibling subtrees.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            mode: SyncMode::Diff,
            dry_run: false,
            clean: false,
            concurrency: 1,
        }
    }
}

/// What the engine did with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Skipped,
    Recreated,
    Failed,
}

/// Per-node line of the run manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub path: NodePath,
    pub kind: NodeKind,
    pub action: Action,
    pub remote_id: Option<RemoteRef>,
    pub error: Option<SyncError>,
}

impl NodeOutcome {
    pub fn done(path: NodePath, kind: NodeKind, action: Action, remote_id: RemoteRef) -> Self {
        NodeOutcome {
            path,
            kind,
            action,
            remote_id: Some(remote_id),
            error: None,
        }
    }

    pub fn failed(path: NodePath, kind: NodeKind, error: SyncError) -> Self {
        NodeOutcome {
            path,
            kind,
            action: Action::Failed,
            remote_id: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub recreated: usize,
    pub failed: usize,
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} skipped={} recreated={} failed={}",
            self.created, self.updated, self.skipped, self.recreated, self.failed
        )
    }
}

/// Manifest of one run.
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub dry_run: bool,
    /// Cache entries invalidated by a clean.
    pub cleaned: usize,
    pub outcomes: Vec<NodeOutcome>,
}

impl SyncReport {
    pub fn outcome(&self, path: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.path.as_str() == path)
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| o.action == Action::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for outcome in &self.outcomes {
            match outcome.action {
                Action::Created => summary.created += 1,
                Action::Updated => summary.updated += 1,
                Action::Skipped => summary.skipped += 1,
                Action::Recreated => summary.recreated += 1,
                Action::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Reconcile `tree` under `root_parent`.
///
/// In a real run the cache is updated in place and saved; in a dry run it is
/// left exactly as it was.
pub async fn synchronise<R>(
    remote: &R,
    root_parent: &RemoteRef,
    tree: &LocalNode,
    cache: &mut CacheStore,
    options: &SyncOptions,
) -> Result<SyncReport, CacheError>
where
    R: RemoteStore,
{
    let run_id = Uuid::new_v4();
    let root_path = NodePath::root(tree.name());
    info!(
        %run_id,
        root = %root_path,
        mode = %options.mode,
        dry_run = options.dry_run,
        "[SYNC] Starting synchronisation"
    );

    // A dry run works on a copy that is dropped at the end.
    let reconciler = Reconciler::new(remote, cache.clone(), options.clone());

    let cleaned = if options.clean {
        reconciler.clean(&root_path).await
    } else {
        0
    };

    let outcomes = reconciler
        .sync_node(tree, Parent::existing(root_parent.clone()), root_path)
        .await;

    let report = SyncReport {
        run_id,
        mode: options.mode,
        dry_run: options.dry_run,
        cleaned,
        outcomes,
    };
    let summary = report.summary();
    for failure in report.failures() {
        if let Some(e) = &failure.error {
            warn!(path = %failure.path, error = %e, "[SYNC] Node failed");
        }
    }
    info!(%run_id, %summary, "[SYNC] Synchronisation finished");

    if !options.dry_run {
        *cache = reconciler.into_cache();
        if let Err(e) = cache.save() {
            error!(error = %e, "[SYNC][ERROR] Failed to save cache");
            return Err(e);
        }
    }

    Ok(report)
}
