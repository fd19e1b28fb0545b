use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::carryover::select_carryover;
use crate::error::{LoreError, Result};
use crate::models::{
    EvictionRecord, MirroredSource, QueryRecord, SyncBranch, SyncReport, UploadKind,
};
use crate::registry::{RegistryCounts, RegistrySnapshot, SourceRegistry};
use crate::remote::{CreateSource, SourceStore, upload_kind_for_path};
use crate::vault::Vault;

/// Cooperative cancellation. Checked between paths, never inside one, so a
/// cancelled batch still leaves every touched binding consistent.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drives a batch of vault paths against the remote source store, reusing,
/// replacing, renaming, or creating mirrored sources as content demands.
/// One batch runs at a time; the registry lock is held for the whole batch
/// and released on any exit, error included.
#[derive(Debug)]
pub struct Synchronizer {
    registry: Mutex<SourceRegistry>,
    capacity_target: usize,
    protected_capacity: usize,
}

impl Synchronizer {
    #[must_use]
    pub fn new(
        registry: SourceRegistry,
        capacity_target: usize,
        protected_capacity: usize,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            capacity_target,
            protected_capacity,
        }
    }

    pub fn sync_batch(
        &self,
        vault: &dyn Vault,
        store: &dyn SourceStore,
        paths: &[String],
        cancel: &CancelFlag,
    ) -> Result<SyncReport> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| LoreError::Internal("registry mutex poisoned".to_string()))?;

        let mut report = SyncReport::new(Uuid::new_v4().to_string(), Utc::now());
        let mut live = store.list_live()?;
        registry.reconcile(&live);
        let vault_paths = vault.list_documents()?.into_iter().collect::<HashSet<_>>();

        for path in paths {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match upload_kind_for_path(path) {
                Some(UploadKind::Text) => {}
                Some(UploadKind::Binary) => {
                    report.record_skip(path.as_str(), "binary payload not mirrored");
                    continue;
                }
                None => {
                    report.record_skip(path.as_str(), "extension not recognized for upload");
                    continue;
                }
            }
            let content = match vault.read_content(path) {
                Ok(Some(content)) => content,
                Ok(None) => {
                    report.record_skip(path.as_str(), "unreadable or not text");
                    continue;
                }
                Err(err) => {
                    report.record_skip(path.as_str(), err.to_string());
                    continue;
                }
            };
            let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();

            let binding = registry
                .entry(path)
                .filter(|entry| !entry.stale)
                .map(|entry| (entry.remote_id.clone(), entry.content_hash.clone()));
            if let Some((bound_id, bound_hash)) = binding {
                let resolved = registry.resolve_id(&bound_id);
                if live.contains(&resolved) {
                    if bound_hash == content_hash {
                        if resolved != bound_id {
                            registry.upsert(path, &resolved, &content_hash);
                        }
                        report.record_source(MirroredSource {
                            path: path.clone(),
                            remote_id: resolved,
                            branch: SyncBranch::Reused,
                        });
                        continue;
                    }
                    // Content changed: the replacement is created before the
                    // old source is touched, and a failed old delete is noted
                    // but never fails the path.
                    let new_id = store.create_source(&create_request(path, content))?;
                    live.insert(new_id.clone());
                    registry.upsert(path, &new_id, &content_hash);
                    registry.register_alias(&resolved, &new_id);
                    match store.delete_source(&resolved) {
                        Ok(_) => {
                            live.remove(&resolved);
                        }
                        Err(err) => {
                            report.warnings.push(format!(
                                "old source {resolved} for {path} not deleted: {err}"
                            ));
                        }
                    }
                    report.record_source(MirroredSource {
                        path: path.clone(),
                        remote_id: new_id,
                        branch: SyncBranch::Replaced,
                    });
                    continue;
                }
            }

            // Rename: identical content is already mirrored under a path
            // that no longer exists locally, so rebind instead of uploading.
            let mut donors = registry
                .entries()
                .filter(|entry| {
                    entry.path != *path && !entry.stale && entry.content_hash == content_hash
                })
                .map(|entry| (entry.path.clone(), entry.remote_id.clone()))
                .collect::<Vec<_>>();
            donors.sort();
            let rename = donors.into_iter().find_map(|(donor_path, donor_id)| {
                let resolved = registry.resolve_id(&donor_id);
                (live.contains(&resolved) && !vault_paths.contains(&donor_path))
                    .then_some(resolved)
            });
            if let Some(resolved) = rename {
                registry.upsert(path, &resolved, &content_hash);
                report.record_source(MirroredSource {
                    path: path.clone(),
                    remote_id: resolved,
                    branch: SyncBranch::Renamed,
                });
                continue;
            }

            self.ensure_capacity(&mut registry, store, &mut live, &mut report)?;
            let new_id = store.create_source(&create_request(path, content))?;
            live.insert(new_id.clone());
            registry.upsert(path, &new_id, &content_hash);
            report.record_source(MirroredSource {
                path: path.clone(),
                remote_id: new_id,
                branch: SyncBranch::Created,
            });
        }

        let produced = report
            .sources
            .iter()
            .map(|source| source.path.clone())
            .collect::<Vec<_>>();
        for path in produced {
            registry.mark_used(&path, self.protected_capacity);
        }
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Carry-over ids for a fresh result: still-live sources from past
    /// queries, minus whatever the fresh batch already produced.
    pub fn carryover_ids(
        &self,
        records: &[QueryRecord],
        excluded: &HashSet<String>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| LoreError::Internal("registry mutex poisoned".to_string()))?;
        let live = registry
            .entries()
            .filter(|entry| !entry.stale)
            .map(|entry| entry.remote_id.clone())
            .collect::<HashSet<_>>();
        let resolve = |id: &str| registry.resolve_id(id);
        Ok(select_carryover(records, resolve, &live, excluded, limit))
    }

    /// Current non-stale bindings for the given paths.
    pub fn bound_ids(&self, paths: &[String]) -> Result<HashMap<String, String>> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| LoreError::Internal("registry mutex poisoned".to_string()))?;
        let mut out = HashMap::new();
        for path in paths {
            if let Some(entry) = registry.entry(path)
                && !entry.stale
            {
                out.insert(path.clone(), registry.resolve_id(&entry.remote_id));
            }
        }
        Ok(out)
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| LoreError::Internal("registry mutex poisoned".to_string()))?;
        Ok(registry.snapshot())
    }

    pub fn counts(&self) -> Result<RegistryCounts> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| LoreError::Internal("registry mutex poisoned".to_string()))?;
        Ok(registry.counts())
    }

    /// Frees remote slots until a new source fits. Candidates whose binding
    /// is already dead remotely are dropped locally without a remote call; a
    /// live candidate that fails to delete fails the batch.
    fn ensure_capacity(
        &self,
        registry: &mut SourceRegistry,
        store: &dyn SourceStore,
        live: &mut HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        while live.len() >= self.capacity_target {
            let Some(candidate) = registry.eviction_candidate() else {
                return Err(LoreError::CapacityExhausted(format!(
                    "remote capacity {} reached with no managed eviction candidate",
                    self.capacity_target
                )));
            };
            let Some(entry) = registry.entry(&candidate) else {
                registry.remove(&candidate);
                continue;
            };
            let resolved = registry.resolve_id(&entry.remote_id);
            if entry.stale || !live.contains(&resolved) {
                registry.remove(&candidate);
                continue;
            }
            store.delete_source(&resolved)?;
            live.remove(&resolved);
            registry.remove(&candidate);
            report.evicted.push(EvictionRecord {
                path: candidate,
                remote_id: resolved,
                evicted_at: Utc::now(),
                reason: "capacity".to_string(),
            });
        }
        Ok(())
    }
}

fn create_request(path: &str, content: String) -> CreateSource {
    CreateSource {
        title: title_for_path(path),
        content,
        kind: UploadKind::Text,
    }
}

fn title_for_path(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
