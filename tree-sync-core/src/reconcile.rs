//! Tree reconciler.
//!
//! Walks the local tree parent-before-children and decides, per node,
//! whether to create, update, skip or recreate the remote counterpart. The
//! cache is the only source of truth for "unchanged"; the remote is read only
//! to resolve identities the cache does not know.
//!
//! Sibling subtrees run concurrently, bounded by a semaphore. A node holds a
//! permit only for its own remote work, never while its children run.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::contract::{ChildKind, RemoteChild, RemoteRef, RemoteStore};
use crate::dataset::DatasetSynchronizer;
use crate::error::{RemoteError, SyncError};
use crate::node::{DocumentNode, FolderNode, LocalNode, NodeKind, NodePath};
use crate::normalize::document_fingerprint;
use crate::synchronise::{Action, NodeOutcome, SyncMode, SyncOptions};

/// The resolved remote parent a node is synced under.
#[derive(Debug, Clone)]
pub struct Parent {
    pub id: RemoteRef,
    /// Created during this run, so it cannot have pre-existing children.
    pub fresh: bool,
}

impl Parent {
    pub fn existing(id: RemoteRef) -> Self {
        Parent { id, fresh: false }
    }

    pub fn fresh(id: RemoteRef) -> Self {
        Parent { id, fresh: true }
    }
}

struct ResolvedFolder {
    id: RemoteRef,
    action: Action,
    fresh: bool,
    from_cache: bool,
}

pub struct Reconciler<'r, R> {
    remote: &'r R,
    cache: Mutex<CacheStore>,
    options: SyncOptions,
    permits: Semaphore,
}

impl<'r, R: RemoteStore> Reconciler<'r, R> {
    pub fn new(remote: &'r R, cache: CacheStore, options: SyncOptions) -> Self {
        let permits = Semaphore::new(options.concurrency.max(1));
        Reconciler {
            remote,
            cache: Mutex::new(cache),
            options,
            permits,
        }
    }

    pub fn into_cache(self) -> CacheStore {
        self.cache.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remote(&self) -> &R {
        self.remote
    }

    pub(crate) fn mode(&self) -> SyncMode {
        self.options.mode
    }

    pub(crate) fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn lock_cache(&self) -> MutexGuard<'_, CacheStore> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cached(&self, path: &NodePath) -> Option<CacheEntry> {
        self.lock_cache().get(path).cloned()
    }

    pub(crate) fn record(&self, path: NodePath, entry: CacheEntry) {
        self.lock_cache().put(path, entry);
    }

    pub(crate) fn forget(&self, path: &NodePath) -> usize {
        self.lock_cache().remove_prefix(path)
    }

    pub(crate) async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    /// Archive the cached remote entity at `path` and drop every cache entry
    /// beneath it. Returns the number of entries dropped.
    pub async fn clean(&self, path: &NodePath) -> usize {
        if let Some(entry) = self.cached(path) {
            if !self.dry_run() {
                match self.remote.archive(&entry.remote_id).await {
                    Ok(()) => info!(path = %path, remote_id = %entry.remote_id, "[SYNC] Archived for clean"),
                    Err(e) if e.is_not_found() => {
                        debug!(path = %path, "[SYNC] Clean target already gone")
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "[SYNC] Clean failed, keeping cache entries");
                        return 0;
                    }
                }
            }
        }
        let dropped = self.forget(path);
        info!(path = %path, dropped, "[SYNC] Cleaned cache entries");
        dropped
    }

    /// Sync `node` (and its subtree) under `parent`.
    pub fn sync_node<'a>(
        &'a self,
        node: &'a LocalNode,
        parent: Parent,
        path: NodePath,
    ) -> BoxFuture<'a, Vec<NodeOutcome>> {
        async move {
            match node {
                LocalNode::Folder(folder) => self.sync_folder(folder, parent, path).await,
                LocalNode::Document(document) => {
                    vec![self.sync_document(document, &parent, path).await]
                }
                LocalNode::Dataset(dataset) => {
                    let _permit = self.permit().await;
                    DatasetSynchronizer::new(self, dataset, &path)
                        .run(&parent)
                        .await
                }
            }
        }
        .boxed()
    }

    async fn sync_folder(
        &self,
        folder: &FolderNode,
        parent: Parent,
        path: NodePath,
    ) -> Vec<NodeOutcome> {
        let resolved = {
            let _permit = self.permit().await;
            self.resolve_folder(folder, &parent, &path).await
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(path = %path, error = %e, "[SYNC] Folder failed, skipping its subtree");
                let mut outcomes = vec![NodeOutcome::failed(path.clone(), NodeKind::Folder, e)];
                outcomes.extend(failed_subtree(&folder.children, &path));
                return outcomes;
            }
        };
        debug!(path = %path, action = ?resolved.action, "[SYNC] Folder resolved");

        let mut folder_outcome = NodeOutcome::done(
            path.clone(),
            NodeKind::Folder,
            resolved.action,
            resolved.id.clone(),
        );
        let mut children = self
            .sync_children(
                &folder.children,
                Parent {
                    id: resolved.id,
                    fresh: resolved.fresh,
                },
                &path,
            )
            .await;

        if resolved.from_cache && lost_parent(&folder.children, &path, &children) {
            warn!(path = %path, "[SYNC] Cached folder is gone remotely, recreating it");
            self.forget(&path);
            let created = {
                let _permit = self.permit().await;
                self.create_container_at(&parent, &folder.name, &path).await
            };
            match created {
                Ok(id) => {
                    self.record(path.clone(), CacheEntry::new(id.clone(), self.mode()));
                    folder_outcome =
                        NodeOutcome::done(path.clone(), NodeKind::Folder, Action::Created, id.clone());
                    children = self
                        .sync_children(&folder.children, Parent::fresh(id), &path)
                        .await;
                }
                Err(e) => {
                    folder_outcome = NodeOutcome::failed(path.clone(), NodeKind::Folder, e);
                    children = failed_subtree(&folder.children, &path);
                }
            }
        }

        let mut outcomes = Vec::with_capacity(children.len() + 1);
        outcomes.push(folder_outcome);
        outcomes.extend(children);
        outcomes
    }

    async fn sync_children(
        &self,
        children: &[LocalNode],
        parent: Parent,
        path: &NodePath,
    ) -> Vec<NodeOutcome> {
        let mut seen = HashSet::new();
        let mut pending: Vec<BoxFuture<'_, Vec<NodeOutcome>>> = Vec::with_capacity(children.len());
        for child in children {
            let child_path = path.child(child.name());
            if seen.insert(child.name()) {
                pending.push(self.sync_node(child, parent.clone(), child_path));
            } else {
                warn!(path = %child_path, "[SYNC] Duplicate sibling name, only the first is synced");
                let mut outcomes = vec![NodeOutcome::failed(
                    child_path.clone(),
                    child.kind(),
                    SyncError::DuplicateName(child.name().to_string()),
                )];
                if let LocalNode::Folder(folder) = child {
                    outcomes.extend(failed_subtree(&folder.children, &child_path));
                }
                pending.push(futures::future::ready(outcomes).boxed());
            }
        }
        join_all(pending).await.into_iter().flatten().collect()
    }

    async fn resolve_folder(
        &self,
        folder: &FolderNode,
        parent: &Parent,
        path: &NodePath,
    ) -> Result<ResolvedFolder, SyncError> {
        // Folders have no content, so force mode reuses them as well.
        if let Some(entry) = self.cached(path) {
            return Ok(ResolvedFolder {
                id: entry.remote_id,
                action: Action::Skipped,
                fresh: false,
                from_cache: true,
            });
        }
        if let Some(child) = self.lookup(parent, &folder.name, ChildKind::Page, path).await? {
            info!(path = %path, remote_id = %child.id, "[SYNC] Reusing existing remote folder");
            self.record(path.clone(), CacheEntry::new(child.id.clone(), self.mode()));
            return Ok(ResolvedFolder {
                id: child.id,
                action: Action::Skipped,
                fresh: false,
                from_cache: false,
            });
        }
        let id = self.create_container_at(parent, &folder.name, path).await?;
        info!(path = %path, remote_id = %id, "[SYNC] Created folder");
        self.record(path.clone(), CacheEntry::new(id.clone(), self.mode()));
        Ok(ResolvedFolder {
            id,
            action: Action::Created,
            fresh: true,
            from_cache: false,
        })
    }

    /// First remote child of `parent` titled `title` of the given kind.
    pub(crate) async fn lookup(
        &self,
        parent: &Parent,
        title: &str,
        kind: ChildKind,
        path: &NodePath,
    ) -> Result<Option<RemoteChild>, SyncError> {
        if parent.fresh {
            return Ok(None);
        }
        let found = self
            .remote
            .find_children(&parent.id, title)
            .await
            .map_err(|e| under_parent(e, path))?;
        let mut matching = found.into_iter().filter(|c| c.kind == kind);
        let first = matching.next();
        if first.is_some() && matching.next().is_some() {
            warn!(path = %path, title, "[SYNC] Several remote children share this title, reusing the first");
        }
        Ok(first)
    }

    async fn create_container_at(
        &self,
        parent: &Parent,
        title: &str,
        path: &NodePath,
    ) -> Result<RemoteRef, SyncError> {
        if self.dry_run() {
            return Ok(preview_ref(path));
        }
        self.remote
            .create_container(&parent.id, title)
            .await
            .map_err(|e| under_parent(e, path))
    }

    async fn create_document_at(
        &self,
        parent: &Parent,
        document: &DocumentNode,
        path: &NodePath,
    ) -> Result<RemoteRef, SyncError> {
        if self.dry_run() {
            return Ok(preview_ref(path));
        }
        self.remote
            .create_document(&parent.id, &document.name, &document.body)
            .await
            .map_err(|e| under_parent(e, path))
    }

    async fn sync_document(
        &self,
        document: &DocumentNode,
        parent: &Parent,
        path: NodePath,
    ) -> NodeOutcome {
        let _permit = self.permit().await;
        let fingerprint = document_fingerprint(&document.body);
        match self.write_document(document, parent, &path, &fingerprint).await {
            Ok((id, action)) => {
                if action != Action::Skipped {
                    self.record(
                        path.clone(),
                        CacheEntry::new(id.clone(), self.mode()).with_fingerprint(fingerprint),
                    );
                }
                info!(path = %path, action = ?action, "[SYNC] Document synced");
                NodeOutcome::done(path, NodeKind::Document, action, id)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "[SYNC] Document failed");
                NodeOutcome::failed(path, NodeKind::Document, e)
            }
        }
    }

    async fn write_document(
        &self,
        document: &DocumentNode,
        parent: &Parent,
        path: &NodePath,
        fingerprint: &str,
    ) -> Result<(RemoteRef, Action), SyncError> {
        match (self.cached(path), self.mode()) {
            (Some(entry), SyncMode::Diff) => {
                if entry.fingerprint.as_deref() == Some(fingerprint) {
                    return Ok((entry.remote_id, Action::Skipped));
                }
                if self.dry_run() {
                    return Ok((entry.remote_id, Action::Updated));
                }
                match self
                    .remote
                    .overwrite_document(&entry.remote_id, &document.body)
                    .await
                {
                    Ok(()) => Ok((entry.remote_id, Action::Updated)),
                    Err(e) if e.is_not_found() => {
                        warn!(path = %path, remote_id = %entry.remote_id, "[SYNC] Cached document is gone remotely, creating it again");
                        let id = self.create_document_at(parent, document, path).await?;
                        Ok((id, Action::Created))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (Some(entry), SyncMode::Force) => {
                if !self.dry_run() {
                    match self.remote.archive(&entry.remote_id).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(path = %path, "[SYNC] Document to recreate was already gone")
                        }
                        Err(e) => return Err(e.into()),
                    }
                    // The archived id must not outlive a failed create.
                    self.forget(path);
                }
                let id = self.create_document_at(parent, document, path).await?;
                Ok((id, Action::Recreated))
            }
            (None, _) => {
                if let Some(existing) = self
                    .lookup(parent, &document.name, ChildKind::Page, path)
                    .await?
                {
                    info!(path = %path, remote_id = %existing.id, "[SYNC] Reusing existing remote document");
                    if !self.dry_run() {
                        self.remote
                            .overwrite_document(&existing.id, &document.body)
                            .await?;
                    }
                    return Ok((existing.id, Action::Updated));
                }
                let id = self.create_document_at(parent, document, path).await?;
                Ok((id, Action::Created))
            }
        }
    }
}

/// Stand-in identity for an entity a dry run would have created.
pub(crate) fn preview_ref(path: &NodePath) -> RemoteRef {
    RemoteRef::new(format!("preview:{path}"))
}

/// A not-found while creating under a parent means the parent is gone.
pub(crate) fn under_parent(err: RemoteError, path: &NodePath) -> SyncError {
    if err.is_not_found() {
        SyncError::ParentNotFound(path.to_string())
    } else {
        SyncError::Remote(err)
    }
}

/// True if a direct child failed because this folder no longer exists.
fn lost_parent(children: &[LocalNode], path: &NodePath, outcomes: &[NodeOutcome]) -> bool {
    let direct: HashSet<NodePath> = children.iter().map(|c| path.child(c.name())).collect();
    outcomes.iter().any(|o| {
        direct.contains(&o.path) && matches!(o.error, Some(SyncError::ParentNotFound(_)))
    })
}

/// Outcomes for every node below a parent that could not be resolved.
fn failed_subtree(children: &[LocalNode], parent_path: &NodePath) -> Vec<NodeOutcome> {
    let mut outcomes = Vec::new();
    for child in children {
        let path = parent_path.child(child.name());
        outcomes.push(NodeOutcome::failed(
            path.clone(),
            child.kind(),
            SyncError::ParentFailed(parent_path.to_string()),
        ));
        if let LocalNode::Folder(folder) = child {
            outcomes.extend(failed_subtree(&folder.children, &path));
        }
    }
    outcomes
}
