use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{LoreError, Result};
use crate::index::VaultIndex;
use crate::models::{EvictionRecord, QueryRecord, SyncReport};
use crate::registry::{RegistryCounts, SourceRegistry};
use crate::remote::{HttpSourceStore, SourceStore};
use crate::retrieval::{self, Selection, SelectionParams};
use crate::state::SqliteStateStore;
use crate::sync::{CancelFlag, Synchronizer};
use crate::vault::{LocalVault, Vault};

pub const STATE_FILE: &str = ".lorekeeper_state.sqlite3";
const QUERY_HISTORY_WINDOW: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub selection: Option<SelectionParams>,
    pub sync_remote: bool,
    pub cancel: CancelFlag,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub asked_at: DateTime<Utc>,
    pub selection: Selection,
    pub carry_over: Vec<String>,
    pub sync: Option<SyncReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub root: String,
    pub documents: usize,
    pub terms: usize,
    pub average_length: f32,
    pub dirty: bool,
    pub queries_logged: usize,
    pub registry: RegistryCounts,
    pub capacity_target: usize,
    pub remote_configured: bool,
}

/// One vault, one state file, one registry. All methods take `&self`; the
/// index sits behind a `RwLock` and the registry behind the synchronizer's
/// own mutex, so clones of the engine share everything.
#[derive(Clone)]
pub struct Lorekeeper {
    pub vault: LocalVault,
    pub state: SqliteStateStore,
    pub index: Arc<RwLock<VaultIndex>>,
    synchronizer: Arc<Synchronizer>,
    mirror: Option<HttpSourceStore>,
    config: AppConfig,
}

impl std::fmt::Debug for Lorekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lorekeeper").finish_non_exhaustive()
    }
}

impl Lorekeeper {
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root_dir, AppConfig::from_env())
    }

    pub fn with_config(root_dir: impl Into<PathBuf>, config: AppConfig) -> Result<Self> {
        let root = root_dir.into();
        fs::create_dir_all(&root)?;
        let vault = LocalVault::new(&root, &config.include_globs)?;
        let state = SqliteStateStore::open(root.join(STATE_FILE))?;

        let mut index = VaultIndex::new();
        index.set_rescan_threshold(config.rescan_threshold);
        if let Some(snapshot) = state.load_index_cache()? {
            index.hydrate(snapshot);
        }
        let registry = state
            .load_registry()?
            .map(SourceRegistry::from_snapshot)
            .unwrap_or_default();
        let synchronizer = Arc::new(Synchronizer::new(
            registry,
            config.capacity_target,
            config.protected_capacity,
        ));
        let mirror = config.remote.clone().map(HttpSourceStore::new).transpose()?;

        Ok(Self {
            vault,
            state,
            index: Arc::new(RwLock::new(index)),
            synchronizer,
            mirror,
            config,
        })
    }

    /// Answers a query: bring the index up to date, rank, optionally mirror
    /// the winners to the remote store, and log the whole exchange.
    pub fn prepare_query(&self, query: &str, options: &QueryOptions) -> Result<QueryOutcome> {
        let store = if options.sync_remote {
            Some(self.require_mirror()? as &dyn SourceStore)
        } else {
            None
        };
        self.run_query(query, options, store)
    }

    pub(crate) fn run_query(
        &self,
        query: &str,
        options: &QueryOptions,
        store: Option<&dyn SourceStore>,
    ) -> Result<QueryOutcome> {
        self.refresh_index(false)?;

        let params = options.selection.unwrap_or(self.config.selection);
        let mut selection = {
            let index = self
                .index
                .read()
                .map_err(|_| LoreError::Internal("index lock poisoned".to_string()))?;
            retrieval::select(&index, query, &params)
        };

        let selected_paths = selection
            .selected
            .iter()
            .map(|scored| scored.path.clone())
            .collect::<Vec<_>>();
        let sync = match store {
            Some(store) => Some(self.run_sync_batch(store, &selected_paths, &options.cancel)?),
            None => None,
        };

        let bound = self.synchronizer.bound_ids(&selected_paths)?;
        for scored in &mut selection.selected {
            scored.remote_id = bound.get(&scored.path).cloned();
        }

        let source_ids = selection
            .selected
            .iter()
            .filter_map(|scored| scored.remote_id.clone())
            .collect::<Vec<_>>();
        let fresh = source_ids.iter().cloned().collect::<HashSet<_>>();
        let history = self.state.recent_query_records(QUERY_HISTORY_WINDOW)?;
        let carry_over = self
            .synchronizer
            .carryover_ids(&history, &fresh, self.config.carry_limit)?;

        let query_id = Uuid::new_v4().to_string();
        let asked_at = Utc::now();
        self.state.append_query_record(&QueryRecord {
            query_id: query_id.clone(),
            asked_at,
            query: query.to_string(),
            source_ids,
        })?;

        Ok(QueryOutcome {
            query_id,
            asked_at,
            selection,
            carry_over,
            sync,
        })
    }

    /// Mirrors every eligible vault document, not just query winners.
    pub fn sync_all(&self, cancel: &CancelFlag) -> Result<SyncReport> {
        let mirror = self.require_mirror()?;
        self.sync_paths_with(mirror, cancel)
    }

    pub(crate) fn sync_paths_with(
        &self,
        store: &dyn SourceStore,
        cancel: &CancelFlag,
    ) -> Result<SyncReport> {
        self.refresh_index(false)?;
        let paths = self.vault.list_documents()?;
        self.run_sync_batch(store, &paths, cancel)
    }

    /// Rebuilds the index from a full vault walk, ignoring the change log.
    pub fn reindex(&self) -> Result<()> {
        self.refresh_index(true)
    }

    pub fn note_modified(&self, path: &str) -> Result<()> {
        let mut index = self
            .index
            .write()
            .map_err(|_| LoreError::Internal("index lock poisoned".to_string()))?;
        index.mark_modified(path);
        Ok(())
    }

    pub fn note_deleted(&self, path: &str) -> Result<()> {
        let mut index = self
            .index
            .write()
            .map_err(|_| LoreError::Internal("index lock poisoned".to_string()))?;
        index.mark_deleted(path);
        Ok(())
    }

    pub fn status(&self) -> Result<VaultStatus> {
        let index = self
            .index
            .read()
            .map_err(|_| LoreError::Internal("index lock poisoned".to_string()))?;
        let documents = index.document_count();
        let terms = index.token_count();
        let average_length = index.average_length();
        let dirty = index.is_dirty();
        drop(index);

        Ok(VaultStatus {
            root: self.vault.root().display().to_string(),
            documents,
            terms,
            average_length,
            dirty,
            queries_logged: self.state.query_log_len()?,
            registry: self.synchronizer.counts()?,
            capacity_target: self.config.capacity_target,
            remote_configured: self.mirror.is_some(),
        })
    }

    pub fn history(&self, limit: usize) -> Result<Vec<QueryRecord>> {
        self.state.recent_query_records(limit)
    }

    #[must_use]
    pub fn selection_params(&self) -> SelectionParams {
        self.config.selection
    }

    pub fn evictions(&self, limit: usize) -> Result<Vec<EvictionRecord>> {
        self.state.recent_evictions(limit)
    }

    fn require_mirror(&self) -> Result<&HttpSourceStore> {
        self.mirror
            .as_ref()
            .ok_or_else(|| LoreError::Validation("remote mirror is not configured".to_string()))
    }

    fn refresh_index(&self, force_full: bool) -> Result<()> {
        let mut index = self
            .index
            .write()
            .map_err(|_| LoreError::Internal("index lock poisoned".to_string()))?;
        index.sync(&self.vault, force_full)?;
        let snapshot = index.snapshot();
        drop(index);
        self.state.save_index_cache(&snapshot)
    }

    // The registry snapshot is written back even when the batch fails, so
    // bindings settled before the failure survive the process.
    fn run_sync_batch(
        &self,
        store: &dyn SourceStore,
        paths: &[String],
        cancel: &CancelFlag,
    ) -> Result<SyncReport> {
        let outcome = self.synchronizer.sync_batch(&self.vault, store, paths, cancel);
        let snapshot = self.synchronizer.snapshot()?;
        self.state.save_registry(&snapshot)?;
        let report = outcome?;
        self.state.append_eviction_records(&report.evicted)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::remote::{CreateSource, DeleteOutcome};
    use crate::retrieval::MatchOutcome;

    #[derive(Default)]
    struct FakeStore {
        sources: RefCell<HashMap<String, String>>,
        next_id: Cell<u32>,
    }

    impl SourceStore for FakeStore {
        fn create_source(&self, request: &CreateSource) -> Result<String> {
            let id = format!("src-{}", self.next_id.get());
            self.next_id.set(self.next_id.get() + 1);
            self.sources
                .borrow_mut()
                .insert(id.clone(), request.content.clone());
            Ok(id)
        }

        fn delete_source(&self, id: &str) -> Result<DeleteOutcome> {
            Ok(if self.sources.borrow_mut().remove(id).is_some() {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::NotFound
            })
        }

        fn list_live(&self) -> Result<std::collections::HashSet<String>> {
            Ok(self.sources.borrow().keys().cloned().collect())
        }
    }

    fn keeper_at(root: &Path) -> Lorekeeper {
        Lorekeeper::with_config(root, AppConfig::default()).expect("keeper")
    }

    fn write_file(root: &Path, name: &str, content: &str) {
        fs::write(root.join(name), content).expect("write");
    }

    #[test]
    fn a_fresh_vault_is_indexed_on_the_first_query() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "# Brewing\noolong steeping notes");
        write_file(temp.path(), "coffee.md", "espresso grind chart");
        let keeper = keeper_at(temp.path());

        let outcome = keeper
            .prepare_query("oolong steeping", &QueryOptions::default())
            .expect("query");

        assert_eq!(outcome.selection.selected.len(), 1);
        assert_eq!(outcome.selection.selected[0].path, "tea.md");
        assert!(outcome.sync.is_none());

        let status = keeper.status().expect("status");
        assert_eq!(status.documents, 2);
        assert!(!status.dirty);
        assert!(!status.remote_configured);
    }

    #[test]
    fn history_and_cached_state_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong notes");
        {
            let keeper = keeper_at(temp.path());
            keeper
                .prepare_query("oolong", &QueryOptions::default())
                .expect("query");
        }

        let keeper = keeper_at(temp.path());
        let history = keeper.history(10).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "oolong");

        // The hydrated index answers immediately but still owes a rescan.
        let status = keeper.status().expect("status");
        assert_eq!(status.documents, 1);
        assert!(status.dirty);
    }

    #[test]
    fn remote_sync_without_configuration_is_refused() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong notes");
        let keeper = keeper_at(temp.path());

        let options = QueryOptions {
            sync_remote: true,
            ..QueryOptions::default()
        };
        let err = keeper
            .prepare_query("oolong", &options)
            .expect_err("must fail");
        assert!(matches!(err, LoreError::Validation(_)));

        let err = keeper.sync_all(&CancelFlag::new()).expect_err("must fail");
        assert!(matches!(err, LoreError::Validation(_)));
    }

    #[test]
    fn mirrored_queries_bind_sources_and_log_their_ids() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong steeping notes");
        write_file(temp.path(), "coffee.md", "espresso grind chart");
        let keeper = keeper_at(temp.path());
        let store = FakeStore::default();

        let outcome = keeper
            .run_query("oolong", &QueryOptions::default(), Some(&store))
            .expect("query");

        let report = outcome.sync.expect("report");
        assert_eq!(report.created, 1);
        assert_eq!(
            outcome.selection.selected[0].remote_id.as_deref(),
            Some("src-0")
        );
        let history = keeper.history(10).expect("history");
        assert_eq!(history[0].source_ids, ["src-0"]);
    }

    #[test]
    fn carry_over_resurfaces_sources_from_earlier_queries() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong brewing notes");
        write_file(temp.path(), "roast.md", "espresso roasting curve");
        let keeper = keeper_at(temp.path());
        let store = FakeStore::default();

        keeper
            .run_query("oolong", &QueryOptions::default(), Some(&store))
            .expect("first query");
        let outcome = keeper
            .run_query("espresso", &QueryOptions::default(), Some(&store))
            .expect("second query");

        assert_eq!(outcome.selection.selected[0].path, "roast.md");
        assert_eq!(outcome.carry_over, ["src-0"]);
    }

    #[test]
    fn note_deleted_prunes_the_index_before_the_next_query() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong notes");
        write_file(temp.path(), "coffee.md", "espresso grind chart");
        let keeper = keeper_at(temp.path());
        keeper
            .prepare_query("oolong", &QueryOptions::default())
            .expect("warm up");

        fs::remove_file(temp.path().join("coffee.md")).expect("remove");
        keeper.note_deleted("coffee.md").expect("note");

        let outcome = keeper
            .prepare_query("espresso", &QueryOptions::default())
            .expect("query");
        assert_eq!(
            outcome.selection.diagnostics.outcome,
            MatchOutcome::NoLexicalMatch
        );
        assert_eq!(keeper.status().expect("status").documents, 1);
    }

    #[test]
    fn reindex_picks_up_silent_rewrites() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong notes");
        let keeper = keeper_at(temp.path());
        keeper
            .prepare_query("oolong", &QueryOptions::default())
            .expect("warm up");

        write_file(temp.path(), "tea.md", "kombucha scoby care and feeding");
        keeper.reindex().expect("reindex");

        let outcome = keeper
            .prepare_query("kombucha", &QueryOptions::default())
            .expect("query");
        assert_eq!(outcome.selection.selected[0].path, "tea.md");
    }

    #[test]
    fn sync_all_mirrors_every_eligible_document() {
        let temp = tempdir().expect("tempdir");
        write_file(temp.path(), "tea.md", "oolong notes");
        write_file(temp.path(), "coffee.md", "espresso grind chart");
        write_file(temp.path(), "scan.png", "not text");
        let keeper = keeper_at(temp.path());
        let store = FakeStore::default();

        let report = keeper
            .sync_paths_with(&store, &CancelFlag::new())
            .expect("sync");

        assert_eq!(report.created, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(store.sources.borrow().len(), 2);
    }
}
