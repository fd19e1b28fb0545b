use std::collections::HashSet;

use crate::models::QueryRecord;

/// Walks past query records newest-first and gathers still-live source ids
/// that the fresh result does not already cover, up to `limit`. Every id is
/// resolved through the caller's alias view before the liveness and
/// exclusion checks, so retired ids count as their successors.
#[must_use]
pub fn select_carryover(
    records: &[QueryRecord],
    resolve: impl Fn(&str) -> String,
    live: &HashSet<String>,
    excluded: &HashSet<String>,
    limit: usize,
) -> Vec<String> {
    let mut collected = Vec::new();
    let mut seen = HashSet::new();
    for record in records {
        for id in &record.source_ids {
            if collected.len() >= limit {
                return collected;
            }
            let resolved = resolve(id);
            if excluded.contains(&resolved) || !live.contains(&resolved) {
                continue;
            }
            if seen.insert(resolved.clone()) {
                collected.push(resolved);
            }
        }
    }
    collected
}
