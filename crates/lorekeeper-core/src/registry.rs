use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Probation,
    Protected,
}

impl Segment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probation => "probation",
            Self::Protected => "protected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub path: String,
    pub remote_id: String,
    pub content_hash: String,
    pub stale: bool,
    pub added_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: u32,
    pub segment: Segment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub by_path: HashMap<String, SourceEntry>,
    pub by_source_id: HashMap<String, String>,
    pub aliases: HashMap<String, String>,
    pub probation: Vec<String>,
    pub protected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub entries: usize,
    pub stale: usize,
    pub probation: usize,
    pub protected: usize,
    pub aliases: usize,
}

/// Local ledger of which vault paths are mirrored under which remote ids.
/// Recency is tracked with two queues (front = most recently used): entries
/// start on probation and graduate to the protected segment on first reuse,
/// so one-shot uploads are always the first to give way under capacity
/// pressure.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    by_path: HashMap<String, SourceEntry>,
    by_source_id: HashMap<String, String>,
    aliases: HashMap<String, String>,
    probation: VecDeque<String>,
    protected: VecDeque<String>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.by_path.values().filter(|entry| entry.stale).count()
    }

    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    #[must_use]
    pub fn segment_lens(&self) -> (usize, usize) {
        (self.probation.len(), self.protected.len())
    }

    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&SourceEntry> {
        self.by_path.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SourceEntry> {
        self.by_path.values()
    }

    /// Follows the alias chain to its terminal id. A chain that loops back on
    /// itself stops at the first repeated id instead of spinning.
    #[must_use]
    pub fn resolve_id(&self, id: &str) -> String {
        resolve_in(&self.aliases, id)
    }

    /// Records that `old_id` has been superseded. The stored target is the
    /// terminal resolution of `new_id`, and existing aliases pointing at
    /// `old_id` are rewritten to it, so chains stay one hop deep.
    pub fn register_alias(&mut self, old_id: &str, new_id: &str) {
        let target = self.resolve_id(new_id);
        if target == old_id {
            return;
        }
        self.aliases.insert(old_id.to_string(), target.clone());
        for mapped in self.aliases.values_mut() {
            if mapped == old_id {
                mapped.clone_from(&target);
            }
        }
    }

    /// Binds `path` to `remote_id`. A path abandoning its previous id drops
    /// that reverse mapping; an id abandoning its previous path evicts the
    /// other entry, so ids and paths stay one-to-one.
    pub fn upsert(&mut self, path: &str, remote_id: &str, content_hash: &str) {
        if let Some(existing) = self.by_path.get(path)
            && existing.remote_id != remote_id
        {
            let old_id = existing.remote_id.clone();
            if self
                .by_source_id
                .get(&old_id)
                .is_some_and(|owner| owner == path)
            {
                self.by_source_id.remove(&old_id);
            }
        }
        if let Some(owner) = self.by_source_id.get(remote_id).cloned()
            && owner != path
        {
            self.remove(&owner);
        }
        let now = Utc::now();
        match self.by_path.get_mut(path) {
            Some(entry) => {
                entry.remote_id = remote_id.to_string();
                entry.content_hash = content_hash.to_string();
                entry.stale = false;
            }
            None => {
                self.by_path.insert(
                    path.to_string(),
                    SourceEntry {
                        path: path.to_string(),
                        remote_id: remote_id.to_string(),
                        content_hash: content_hash.to_string(),
                        stale: false,
                        added_at: now,
                        last_used_at: now,
                        use_count: 0,
                        segment: Segment::Probation,
                    },
                );
            }
        }
        self.by_source_id
            .insert(remote_id.to_string(), path.to_string());
        let queued = self.probation.iter().any(|queued| queued == path)
            || self.protected.iter().any(|queued| queued == path);
        if !queued {
            self.probation.push_front(path.to_string());
        }
    }

    /// Refreshes recency for `path`. The first reuse promotes a probation
    /// entry into the protected segment; the protected queue is capped by
    /// demoting its tail back onto probation.
    pub fn mark_used(&mut self, path: &str, protected_capacity: usize) {
        let Some(entry) = self.by_path.get_mut(path) else {
            return;
        };
        entry.last_used_at = Utc::now();
        entry.use_count = entry.use_count.saturating_add(1);
        let promote = entry.segment == Segment::Probation && entry.use_count >= 2;
        if promote {
            entry.segment = Segment::Protected;
        }
        let segment = entry.segment;
        if promote {
            remove_path_from(&mut self.probation, path);
            self.protected.push_front(path.to_string());
            self.cap_protected(protected_capacity);
        } else {
            match segment {
                Segment::Probation => move_to_front(&mut self.probation, path),
                Segment::Protected => move_to_front(&mut self.protected, path),
            }
        }
    }

    /// Least-valuable entry under the two-segment policy: the probation tail,
    /// or the protected tail demoted into probation when probation is empty.
    /// The candidate is reported, not removed.
    pub fn eviction_candidate(&mut self) -> Option<String> {
        if self.probation.is_empty()
            && let Some(path) = self.protected.pop_back()
        {
            if let Some(entry) = self.by_path.get_mut(&path) {
                entry.segment = Segment::Probation;
            }
            self.probation.push_front(path);
        }
        self.probation.back().cloned()
    }

    pub fn remove(&mut self, path: &str) -> Option<SourceEntry> {
        // Queues are purged even for unknown paths so a stray member can
        // never keep resurfacing as an eviction candidate.
        remove_path_from(&mut self.probation, path);
        remove_path_from(&mut self.protected, path);
        let entry = self.by_path.remove(path)?;
        if self
            .by_source_id
            .get(&entry.remote_id)
            .is_some_and(|owner| owner == path)
        {
            self.by_source_id.remove(&entry.remote_id);
        }
        Some(entry)
    }

    /// Aligns the ledger with the set of ids actually live on the remote.
    /// Entries whose resolved id is live are rewritten to that canonical id;
    /// the rest are flagged stale but kept, since their files may simply need
    /// re-mirroring.
    pub fn reconcile(&mut self, live: &HashSet<String>) {
        let mut paths = self.by_path.keys().cloned().collect::<Vec<_>>();
        paths.sort_unstable();
        for path in paths {
            let Some(entry) = self.by_path.get(&path) else {
                continue;
            };
            let old_id = entry.remote_id.clone();
            let resolved = self.resolve_id(&old_id);
            if !live.contains(&resolved) {
                if let Some(entry) = self.by_path.get_mut(&path) {
                    entry.stale = true;
                }
                continue;
            }
            if resolved == old_id {
                if let Some(entry) = self.by_path.get_mut(&path) {
                    entry.stale = false;
                }
                continue;
            }
            if self
                .by_source_id
                .get(&old_id)
                .is_some_and(|owner| *owner == path)
            {
                self.by_source_id.remove(&old_id);
            }
            if let Some(other) = self.by_source_id.get(&resolved).cloned()
                && other != path
            {
                self.remove(&other);
            }
            if let Some(entry) = self.by_path.get_mut(&path) {
                entry.remote_id.clone_from(&resolved);
                entry.stale = false;
            }
            self.by_source_id.insert(resolved, path);
        }
    }

    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        RegistryCounts {
            entries: self.by_path.len(),
            stale: self.stale_count(),
            probation: self.probation.len(),
            protected: self.protected.len(),
            aliases: self.aliases.len(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            by_path: self.by_path.clone(),
            by_source_id: self.by_source_id.clone(),
            aliases: self.aliases.clone(),
            probation: self.probation.iter().cloned().collect(),
            protected: self.protected.iter().cloned().collect(),
        }
    }

    /// Rebuilds a registry from persisted state, repairing whatever a stale
    /// or hand-edited snapshot may have broken: queue members without an
    /// entry, entries missing from both queues, segment fields disagreeing
    /// with queue membership, duplicate id claims, and alias chains that
    /// dangle or loop.
    #[must_use]
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut by_path = snapshot.by_path;

        let mut seen = HashSet::new();
        let mut probation = VecDeque::new();
        for path in snapshot.probation {
            if by_path.contains_key(&path) && seen.insert(path.clone()) {
                probation.push_back(path);
            }
        }
        let mut protected = VecDeque::new();
        for path in snapshot.protected {
            if by_path.contains_key(&path) && seen.insert(path.clone()) {
                protected.push_back(path);
            }
        }
        let mut unqueued = by_path
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect::<Vec<_>>();
        unqueued.sort_unstable();
        for path in unqueued {
            probation.push_back(path);
        }

        let mut by_source_id = HashMap::new();
        let mut duplicate_claims = Vec::new();
        let mut sorted_paths = by_path.keys().cloned().collect::<Vec<_>>();
        sorted_paths.sort_unstable();
        for path in sorted_paths {
            let Some(entry) = by_path.get(&path) else {
                continue;
            };
            if by_source_id.contains_key(&entry.remote_id) {
                duplicate_claims.push(path);
            } else {
                by_source_id.insert(entry.remote_id.clone(), path);
            }
        }
        for path in duplicate_claims {
            by_path.remove(&path);
            remove_path_from(&mut probation, &path);
            remove_path_from(&mut protected, &path);
        }

        for path in &probation {
            if let Some(entry) = by_path.get_mut(path) {
                entry.segment = Segment::Probation;
            }
        }
        for path in &protected {
            if let Some(entry) = by_path.get_mut(path) {
                entry.segment = Segment::Protected;
            }
        }

        let mut aliases = HashMap::new();
        for old_id in snapshot.aliases.keys() {
            if by_source_id.contains_key(old_id) {
                continue;
            }
            let target = resolve_in(&snapshot.aliases, old_id);
            if target != *old_id && by_source_id.contains_key(&target) {
                aliases.insert(old_id.clone(), target);
            }
        }

        Self {
            by_path,
            by_source_id,
            aliases,
            probation,
            protected,
        }
    }

    fn cap_protected(&mut self, capacity: usize) {
        while self.protected.len() > capacity {
            let Some(path) = self.protected.pop_back() else {
                break;
            };
            if let Some(entry) = self.by_path.get_mut(&path) {
                entry.segment = Segment::Probation;
            }
            self.probation.push_front(path);
        }
    }
}

fn resolve_in(aliases: &HashMap<String, String>, id: &str) -> String {
    let mut current = id.to_string();
    let mut seen = HashSet::new();
    while seen.insert(current.clone()) {
        match aliases.get(&current) {
            Some(next) => current.clone_from(next),
            None => break,
        }
    }
    current
}

fn remove_path_from(queue: &mut VecDeque<String>, path: &str) {
    queue.retain(|candidate| candidate != path);
}

fn move_to_front(queue: &mut VecDeque<String>, path: &str) {
    if let Some(index) = queue.iter().position(|candidate| candidate == path) {
        queue.remove(index);
    }
    queue.push_front(path.to_string());
}
