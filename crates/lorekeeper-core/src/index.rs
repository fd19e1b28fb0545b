use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CachedDocument, CachedIndexState, DocumentStat, INDEX_CACHE_SCHEMA_VERSION};
use crate::tokenize::{tokenize, tokenize_path};
use crate::vault::Vault;

const WEIGHT_BODY: f32 = 1.0;
const WEIGHT_HEADING: f32 = 2.5;
const WEIGHT_PATH: f32 = 4.0;

pub const DEFAULT_RESCAN_THRESHOLD: u32 = 50;

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub weighted_length: f32,
    pub term_frequency: HashMap<String, f32>,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

/// Lexical index over a document vault. Documents carry field-weighted term
/// frequencies; the inverted posting map is derived data kept exactly in step
/// with the document set.
#[derive(Debug)]
pub struct VaultIndex {
    documents: HashMap<String, IndexedDocument>,
    postings: HashMap<String, HashMap<String, f32>>,
    average_length: f32,
    pending_modified: HashSet<String>,
    pending_deleted: HashSet<String>,
    full_rescan_needed: bool,
    incremental_syncs: u32,
    rescan_threshold: u32,
}

impl Default for VaultIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            postings: HashMap::new(),
            average_length: 0.0,
            pending_modified: HashSet::new(),
            pending_deleted: HashSet::new(),
            // A fresh index has observed nothing; the first sync must scan.
            full_rescan_needed: true,
            incremental_syncs: 0,
            rescan_threshold: DEFAULT_RESCAN_THRESHOLD,
        }
    }

    pub fn set_rescan_threshold(&mut self, threshold: u32) {
        self.rescan_threshold = threshold;
    }

    pub fn mark_modified(&mut self, path: &str) {
        self.pending_deleted.remove(path);
        self.pending_modified.insert(path.to_string());
    }

    pub fn mark_deleted(&mut self, path: &str) {
        self.pending_modified.remove(path);
        self.pending_deleted.insert(path.to_string());
    }

    pub fn mark_full_rescan(&mut self) {
        self.full_rescan_needed = true;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.full_rescan_needed
            || !self.pending_modified.is_empty()
            || !self.pending_deleted.is_empty()
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.postings.len()
    }

    #[must_use]
    pub fn average_length(&self) -> f32 {
        self.average_length
    }

    #[must_use]
    pub fn document(&self, path: &str) -> Option<&IndexedDocument> {
        self.documents.get(path)
    }

    #[must_use]
    pub fn posting(&self, token: &str) -> Option<&HashMap<String, f32>> {
        self.postings.get(token)
    }

    /// Brings the index up to date with the vault. Pending per-path signals
    /// are applied incrementally; a requested or overdue full rescan diffs the
    /// live listing instead, catching signals that were missed or misordered.
    pub fn sync(&mut self, vault: &dyn Vault, force_full: bool) -> Result<()> {
        if !force_full && !self.is_dirty() {
            return Ok(());
        }
        if force_full || self.full_rescan_needed || self.incremental_syncs > self.rescan_threshold
        {
            self.full_rescan(vault)?;
        } else {
            self.incremental_sync(vault)?;
        }
        self.recompute_average_length();
        Ok(())
    }

    /// Seeds an empty index from a cached snapshot. A schema mismatch skips
    /// the snapshot entirely; a successful load still schedules a full rescan
    /// because the cache is never authoritative over live documents.
    pub fn hydrate(&mut self, snapshot: CachedIndexState) {
        if snapshot.schema_version != INDEX_CACHE_SCHEMA_VERSION {
            return;
        }
        self.documents.clear();
        self.postings.clear();
        for (path, cached) in snapshot.documents {
            for (token, freq) in &cached.term_frequency {
                self.postings
                    .entry(token.clone())
                    .or_default()
                    .insert(path.clone(), *freq);
            }
            self.documents.insert(
                path,
                IndexedDocument {
                    weighted_length: cached.length,
                    term_frequency: cached.term_frequency,
                    modified_at: cached.modified_at,
                    size: cached.size,
                },
            );
        }
        self.average_length = snapshot.average_document_length;
        self.full_rescan_needed = true;
    }

    #[must_use]
    pub fn snapshot(&self) -> CachedIndexState {
        let documents = self
            .documents
            .iter()
            .map(|(path, doc)| {
                (
                    path.clone(),
                    CachedDocument {
                        length: doc.weighted_length,
                        modified_at: doc.modified_at,
                        size: doc.size,
                        term_frequency: doc.term_frequency.clone(),
                    },
                )
            })
            .collect();
        CachedIndexState {
            schema_version: INDEX_CACHE_SCHEMA_VERSION,
            average_document_length: self.average_length,
            documents,
        }
    }

    fn full_rescan(&mut self, vault: &dyn Vault) -> Result<()> {
        let live = vault.list_documents()?;
        let live_set = live.iter().map(String::as_str).collect::<HashSet<_>>();
        let vanished = self
            .documents
            .keys()
            .filter(|path| !live_set.contains(path.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for path in vanished {
            self.remove_document(&path);
        }
        for path in &live {
            let Some(stat) = vault.metadata(path)? else {
                self.remove_document(path);
                continue;
            };
            let unchanged = self
                .documents
                .get(path)
                .is_some_and(|doc| doc.modified_at == stat.modified_at && doc.size == stat.size);
            if unchanged {
                continue;
            }
            self.upsert_document(vault, path, stat)?;
        }
        self.pending_modified.clear();
        self.pending_deleted.clear();
        self.full_rescan_needed = false;
        self.incremental_syncs = 0;
        Ok(())
    }

    fn incremental_sync(&mut self, vault: &dyn Vault) -> Result<()> {
        let deleted = self.pending_deleted.drain().collect::<Vec<_>>();
        for path in deleted {
            self.remove_document(&path);
        }
        let modified = self.pending_modified.drain().collect::<Vec<_>>();
        for path in modified {
            match vault.metadata(&path)? {
                Some(stat) => self.upsert_document(vault, &path, stat)?,
                None => self.remove_document(&path),
            }
        }
        self.incremental_syncs = self.incremental_syncs.saturating_add(1);
        Ok(())
    }

    fn upsert_document(&mut self, vault: &dyn Vault, path: &str, stat: DocumentStat) -> Result<()> {
        let Some(content) = vault.read_content(path)? else {
            self.remove_document(path);
            return Ok(());
        };
        self.remove_document(path);
        let (term_frequency, weighted_length) = build_weighted_terms(path, &content);
        for (token, freq) in &term_frequency {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(path.to_string(), *freq);
        }
        self.documents.insert(
            path.to_string(),
            IndexedDocument {
                weighted_length,
                term_frequency,
                modified_at: stat.modified_at,
                size: stat.size,
            },
        );
        Ok(())
    }

    fn remove_document(&mut self, path: &str) {
        let Some(doc) = self.documents.remove(path) else {
            return;
        };
        for token in doc.term_frequency.keys() {
            if let Some(posting) = self.postings.get_mut(token) {
                posting.remove(path);
                if posting.is_empty() {
                    self.postings.remove(token);
                }
            }
        }
    }

    fn recompute_average_length(&mut self) {
        if self.documents.is_empty() {
            self.average_length = 0.0;
            return;
        }
        let total = self
            .documents
            .values()
            .map(|doc| doc.weighted_length)
            .sum::<f32>();
        self.average_length = total / usize_to_f32(self.documents.len());
    }
}

fn build_weighted_terms(path: &str, content: &str) -> (HashMap<String, f32>, f32) {
    let mut term_frequency = HashMap::new();
    let mut weighted_length = 0.0_f32;
    for token in tokenize(content) {
        accumulate(&mut term_frequency, &mut weighted_length, token, WEIGHT_BODY);
    }
    for heading in heading_lines(content) {
        for token in tokenize(heading) {
            accumulate(
                &mut term_frequency,
                &mut weighted_length,
                token,
                WEIGHT_HEADING,
            );
        }
    }
    for token in tokenize_path(path) {
        accumulate(&mut term_frequency, &mut weighted_length, token, WEIGHT_PATH);
    }
    (term_frequency, weighted_length)
}

// The weighted length is the running sum of exactly the weights entered into
// the term map; it is never derived again elsewhere.
fn accumulate(
    term_frequency: &mut HashMap<String, f32>,
    weighted_length: &mut f32,
    token: String,
    weight: f32,
) {
    *term_frequency.entry(token).or_insert(0.0) += weight;
    *weighted_length += weight;
}

fn heading_lines(content: &str) -> Vec<&str> {
    let mut headings = Vec::new();
    let mut in_fence_block = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence_block = !in_fence_block;
            continue;
        }
        if in_fence_block {
            continue;
        }
        let level = trimmed.chars().take_while(|ch| *ch == '#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let Some(raw_heading) = trimmed.get(level..) else {
            continue;
        };
        let heading = raw_heading.trim().trim_end_matches('#').trim_end();
        if heading.is_empty() {
            continue;
        }
        headings.push(heading);
    }
    headings
}

#[allow(
    clippy::cast_precision_loss,
    reason = "ranking lengths are intentionally lossy floating-point values"
)]
pub(crate) const fn usize_to_f32(value: usize) -> f32 {
    value as f32
}
