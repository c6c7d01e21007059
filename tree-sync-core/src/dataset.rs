//! Dataset synchronizer.
//!
//! Reconciles one [`DatasetNode`] against its remote dataset:
//! 1. resolve the dataset (cache, then title lookup, then create)
//! 2. check the remote schema before touching any row; force mode also
//!    re-asserts the dataset's title and columns
//! 3. fetch every existing row with a single query and match by title
//! 4. create, overwrite or skip each row by its own fingerprint
//!
//! The dataset-level fingerprint is only cached once every row synced, so a
//! partially failed dataset is revisited on the next run.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::cache::CacheEntry;
use crate::contract::{ChildKind, DatasetRef, RemoteRef, RemoteStore};
use crate::error::SyncError;
use crate::node::{DatasetNode, NodeKind, NodePath, Row, Schema};
use crate::normalize::{dataset_fingerprint, row_fingerprint};
use crate::reconcile::{preview_ref, under_parent, Parent, Reconciler};
use crate::synchronise::{Action, NodeOutcome, SyncMode};

struct ResolvedDataset {
    reference: DatasetRef,
    created: bool,
}

pub(crate) struct DatasetSynchronizer<'a, 'r, R> {
    ctx: &'a Reconciler<'r, R>,
    node: &'a DatasetNode,
    path: &'a NodePath,
}

impl<'a, 'r, R: RemoteStore> DatasetSynchronizer<'a, 'r, R> {
    pub(crate) fn new(ctx: &'a Reconciler<'r, R>, node: &'a DatasetNode, path: &'a NodePath) -> Self {
        DatasetSynchronizer { ctx, node, path }
    }

    fn failed(&self, error: SyncError) -> Vec<NodeOutcome> {
        warn!(path = %self.path, error = %error, "[SYNC][DATASET] Dataset failed");
        vec![NodeOutcome::failed(self.path.clone(), NodeKind::Dataset, error)]
    }

    pub(crate) async fn run(&self, parent: &Parent) -> Vec<NodeOutcome> {
        if let Err(reason) = self.node.schema.validate() {
            return self.failed(SyncError::Validation(reason));
        }
        let mode = self.ctx.mode();
        let fingerprint = dataset_fingerprint(self.node);
        let cached = self.ctx.cached(self.path);

        if mode == SyncMode::Diff {
            if let Some(entry) = &cached {
                if entry.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                    debug!(path = %self.path, "[SYNC][DATASET] Unchanged, skipping");
                    return self.unchanged(entry.remote_id.clone());
                }
            }
        }

        let resolved = match self.resolve(parent, cached).await {
            Ok(resolved) => resolved,
            Err(e) => return self.failed(e),
        };
        let identity = CacheEntry::new(resolved.reference.dataset.clone(), mode)
            .with_rows(resolved.reference.rows.clone());
        self.ctx.record(self.path.clone(), identity.clone());

        // Force rebuilds in place, starting with the dataset itself.
        let mut mutated = false;
        if mode == SyncMode::Force && !resolved.created {
            if let Err(e) = self.rebuild(&resolved.reference).await {
                return self.failed(e);
            }
            mutated = true;
        }

        let existing = match self.existing_rows(&resolved).await {
            Ok(existing) => existing,
            Err(e) => return self.failed(e),
        };

        let mut rows = Vec::with_capacity(self.node.rows.len());
        let mut seen = HashSet::new();
        let mut all_synced = true;
        for row in &self.node.rows {
            let outcome = self
                .sync_row(row, &resolved.reference, &existing, &mut seen)
                .await;
            match outcome.action {
                Action::Failed => all_synced = false,
                Action::Skipped => {}
                _ => mutated = true,
            }
            rows.push(outcome);
        }

        if all_synced {
            self.ctx
                .record(self.path.clone(), identity.with_fingerprint(fingerprint));
        } else {
            warn!(path = %self.path, "[SYNC][DATASET] Some rows failed, dataset stays dirty");
        }

        let action = if resolved.created {
            Action::Created
        } else if !mutated {
            Action::Skipped
        } else if mode == SyncMode::Force {
            Action::Recreated
        } else {
            Action::Updated
        };
        info!(path = %self.path, action = ?action, rows = rows.len(), "[SYNC][DATASET] Dataset synced");

        let mut outcomes = Vec::with_capacity(rows.len() + 1);
        outcomes.push(NodeOutcome::done(
            self.path.clone(),
            NodeKind::Dataset,
            action,
            resolved.reference.dataset,
        ));
        outcomes.extend(rows);
        outcomes
    }

    /// Outcomes for a dataset skipped without any remote call.
    fn unchanged(&self, id: RemoteRef) -> Vec<NodeOutcome> {
        let mut outcomes = vec![NodeOutcome::done(
            self.path.clone(),
            NodeKind::Dataset,
            Action::Skipped,
            id,
        )];
        for row in &self.node.rows {
            let row_path = self.path.row(row.title(&self.node.schema));
            if let Some(entry) = self.ctx.cached(&row_path) {
                outcomes.push(NodeOutcome::done(
                    row_path,
                    NodeKind::Row,
                    Action::Skipped,
                    entry.remote_id,
                ));
            }
        }
        outcomes
    }

    async fn resolve(
        &self,
        parent: &Parent,
        cached: Option<CacheEntry>,
    ) -> Result<ResolvedDataset, SyncError> {
        if let Some(entry) = cached {
            if entry.rows_id.is_some() {
                match self.ctx.remote().retrieve_dataset(&entry.remote_id).await {
                    Ok(remote) => {
                        self.check_schema(&remote.schema)?;
                        return Ok(ResolvedDataset {
                            reference: remote.reference,
                            created: false,
                        });
                    }
                    Err(e) if e.is_not_found() => {
                        warn!(path = %self.path, remote_id = %entry.remote_id, "[SYNC][DATASET] Cached dataset is gone remotely, creating it again");
                        self.ctx.forget(self.path);
                        return self.create(parent).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if let Some(child) = self
            .ctx
            .lookup(parent, &self.node.name, ChildKind::Dataset, self.path)
            .await?
        {
            info!(path = %self.path, remote_id = %child.id, "[SYNC][DATASET] Reusing existing remote dataset");
            let remote = self.ctx.remote().retrieve_dataset(&child.id).await?;
            self.check_schema(&remote.schema)?;
            return Ok(ResolvedDataset {
                reference: remote.reference,
                created: false,
            });
        }

        self.create(parent).await
    }

    async fn create(&self, parent: &Parent) -> Result<ResolvedDataset, SyncError> {
        let reference = if self.ctx.dry_run() {
            let preview = preview_ref(self.path);
            DatasetRef {
                dataset: preview.clone(),
                rows: preview,
            }
        } else {
            self.ctx
                .remote()
                .create_dataset(&parent.id, &self.node.name, &self.node.schema)
                .await
                .map_err(|e| under_parent(e, self.path))?
        };
        info!(path = %self.path, remote_id = %reference.dataset, "[SYNC][DATASET] Created dataset");
        Ok(ResolvedDataset {
            reference,
            created: true,
        })
    }

    async fn rebuild(&self, reference: &DatasetRef) -> Result<(), SyncError> {
        if self.ctx.dry_run() {
            return Ok(());
        }
        self.ctx
            .remote()
            .overwrite_dataset(reference, &self.node.name, &self.node.schema)
            .await?;
        debug!(path = %self.path, "[SYNC][DATASET] Re-asserted dataset title and columns");
        Ok(())
    }

    /// Compare column sets. Column order is irrelevant.
    fn check_schema(&self, remote: &Schema) -> Result<(), SyncError> {
        let describe = |s: &Schema| -> BTreeSet<String> {
            s.columns
                .iter()
                .map(|c| format!("{} ({:?})", c.name, c.kind))
                .collect()
        };
        let local = describe(&self.node.schema);
        let remote = describe(remote);
        if local == remote {
            return Ok(());
        }
        Err(SyncError::SchemaMismatch {
            dataset: self.path.to_string(),
            missing: local.difference(&remote).cloned().collect(),
            unexpected: remote.difference(&local).cloned().collect(),
        })
    }

    /// Remote rows keyed by title, from one batched query.
    async fn existing_rows(
        &self,
        resolved: &ResolvedDataset,
    ) -> Result<HashMap<String, RemoteRef>, SyncError> {
        if resolved.created && self.ctx.dry_run() {
            return Ok(HashMap::new());
        }
        let rows = self.ctx.remote().query_rows(&resolved.reference).await?;
        let mut by_title = HashMap::with_capacity(rows.len());
        for row in rows {
            if by_title.contains_key(&row.title) {
                warn!(path = %self.path, title = %row.title, "[SYNC][DATASET] Remote rows share a title, using the first");
                continue;
            }
            by_title.insert(row.title, row.id);
        }
        debug!(path = %self.path, rows = by_title.len(), "[SYNC][DATASET] Fetched remote rows");
        Ok(by_title)
    }

    async fn sync_row<'t>(
        &self,
        row: &'t Row,
        dataset: &DatasetRef,
        existing: &HashMap<String, RemoteRef>,
        seen: &mut HashSet<&'t str>,
    ) -> NodeOutcome {
        let schema = &self.node.schema;
        let title = row.title(schema);
        let row_path = self.path.row(title);
        if title.trim().is_empty() {
            return NodeOutcome::failed(
                row_path,
                NodeKind::Row,
                SyncError::Validation("row has an empty title".to_string()),
            );
        }
        if !seen.insert(title) {
            warn!(path = %row_path, "[SYNC][DATASET] Duplicate row title, only the first is synced");
            return NodeOutcome::failed(row_path, NodeKind::Row, SyncError::DuplicateName(title.to_string()));
        }

        let fingerprint = row_fingerprint(schema, row);
        match self.write_row(row, title, &row_path, dataset, existing, &fingerprint).await {
            Ok((id, action)) => {
                if action != Action::Skipped {
                    self.ctx.record(
                        row_path.clone(),
                        CacheEntry::new(id.clone(), self.ctx.mode()).with_fingerprint(fingerprint),
                    );
                }
                NodeOutcome::done(row_path, NodeKind::Row, action, id)
            }
            Err(e) => {
                warn!(path = %row_path, error = %e, "[SYNC][DATASET] Row failed");
                NodeOutcome::failed(row_path, NodeKind::Row, e)
            }
        }
    }

    async fn write_row(
        &self,
        row: &Row,
        title: &str,
        row_path: &NodePath,
        dataset: &DatasetRef,
        existing: &HashMap<String, RemoteRef>,
        fingerprint: &str,
    ) -> Result<(RemoteRef, Action), SyncError> {
        let schema = &self.node.schema;
        let remote = self.ctx.remote();
        let mode = self.ctx.mode();

        let Some(id) = existing.get(title) else {
            if self.ctx.dry_run() {
                return Ok((preview_ref(row_path), Action::Created));
            }
            let id = remote.create_row(dataset, schema, row).await?;
            if !row.body.is_empty() {
                // The row exists now, but without its body it is not synced.
                remote.append_body(&id, &row.body).await?;
            }
            return Ok((id, Action::Created));
        };

        let unchanged = self
            .ctx
            .cached(row_path)
            .is_some_and(|e| &e.remote_id == id && e.fingerprint.as_deref() == Some(fingerprint));
        if mode == SyncMode::Diff && unchanged {
            return Ok((id.clone(), Action::Skipped));
        }

        if !self.ctx.dry_run() {
            remote.overwrite_row(id, schema, row).await?;
            // An empty body still clears media left from an earlier version.
            remote.overwrite_document(id, &row.body).await?;
        }
        let action = match mode {
            SyncMode::Force => Action::Recreated,
            SyncMode::Diff => Action::Updated,
        };
        Ok((id.clone(), action))
    }
}
