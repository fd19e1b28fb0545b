use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::index::{VaultIndex, usize_to_f32};
use crate::tokenize::tokenize;

pub const DEFAULT_TOP_N: usize = 15;
pub const DEFAULT_CUTOFF_RATIO: f32 = 0.4;
pub const DEFAULT_MIN_K: usize = 3;
pub const DEFAULT_BM25_K1: f32 = 1.2;
pub const DEFAULT_BM25_B: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionParams {
    pub top_n: usize,
    pub cutoff_ratio: f32,
    pub min_k: usize,
    pub k1: f32,
    pub b: f32,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            cutoff_ratio: DEFAULT_CUTOFF_RATIO,
            min_k: DEFAULT_MIN_K,
            k1: DEFAULT_BM25_K1,
            b: DEFAULT_BM25_B,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPath {
    pub path: String,
    pub score: f32,
    pub matched_terms: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    NoQueryTokens,
    NoLexicalMatch,
    AllScoredZero,
    Matched,
}

impl MatchOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoQueryTokens => "no_query_tokens",
            Self::NoLexicalMatch => "no_lexical_match",
            Self::AllScoredZero => "all_scored_zero",
            Self::Matched => "matched",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchDiagnostics {
    pub query_tokens: Vec<String>,
    pub matched_tokens: Vec<String>,
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub top_ranked: Vec<ScoredPath>,
    pub selected: Vec<ScoredPath>,
    pub diagnostics: MatchDiagnostics,
}

/// Scores the indexed documents against the query with BM25 over the
/// field-weighted frequencies, then narrows the ranking to the heads that
/// clear the relative cutoff.
#[must_use]
pub fn select(index: &VaultIndex, query: &str, params: &SelectionParams) -> Selection {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Selection {
            top_ranked: Vec::new(),
            selected: Vec::new(),
            diagnostics: MatchDiagnostics {
                query_tokens,
                matched_tokens: Vec::new(),
                outcome: MatchOutcome::NoQueryTokens,
            },
        };
    }

    let mut query_frequency: HashMap<&str, f32> = HashMap::new();
    for token in &query_tokens {
        *query_frequency.entry(token.as_str()).or_insert(0.0) += 1.0;
    }

    let mut matched_tokens = query_frequency
        .keys()
        .filter(|token| index.posting(token).is_some())
        .map(|token| (*token).to_string())
        .collect::<Vec<_>>();
    matched_tokens.sort_unstable();

    let total_docs = usize_to_f32(index.document_count());
    let average_length = if index.average_length() > 0.0 {
        index.average_length()
    } else {
        1.0
    };

    let mut accumulated: HashMap<&str, (f32, usize)> = HashMap::new();
    // Walk tokens in first-appearance order; float accumulation order must
    // not depend on hash iteration.
    let mut seen = HashSet::new();
    for token in &query_tokens {
        if !seen.insert(token.as_str()) {
            continue;
        }
        let Some(posting) = index.posting(token) else {
            continue;
        };
        let query_freq = query_frequency.get(token.as_str()).copied().unwrap_or(0.0);
        let document_freq = usize_to_f32(posting.len());
        let idf_ratio = (total_docs - document_freq + 0.5) / (document_freq + 0.5);
        let idf = idf_ratio.ln_1p().max(0.0);
        for (path, term_freq) in posting {
            let doc_length = index
                .document(path)
                .map_or(0.0, |doc| doc.weighted_length);
            let length_norm = params.b.mul_add(doc_length / average_length, 1.0 - params.b);
            let score = idf * (term_freq * (params.k1 + 1.0))
                / (term_freq + params.k1 * length_norm)
                * query_freq;
            let entry = accumulated.entry(path.as_str()).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }

    let mut ranked = accumulated
        .into_iter()
        .filter(|(_, (score, _))| *score > 0.0)
        .map(|(path, (score, matched_terms))| ScoredPath {
            path: path.to_string(),
            score,
            matched_terms,
            remote_id: None,
        })
        .collect::<Vec<_>>();
    ranked.sort_by(score_ordering);
    ranked.truncate(params.top_n);

    let outcome = if matched_tokens.is_empty() {
        MatchOutcome::NoLexicalMatch
    } else if ranked.is_empty() {
        MatchOutcome::AllScoredZero
    } else {
        MatchOutcome::Matched
    };
    let selected = apply_cutoff(&ranked, params);

    Selection {
        top_ranked: ranked,
        selected,
        diagnostics: MatchDiagnostics {
            query_tokens,
            matched_tokens,
            outcome,
        },
    }
}

fn score_ordering(a: &ScoredPath, b: &ScoredPath) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.matched_terms.cmp(&a.matched_terms))
        .then_with(|| a.path.cmp(&b.path))
}

fn apply_cutoff(ranked: &[ScoredPath], params: &SelectionParams) -> Vec<ScoredPath> {
    let Some(top) = ranked.first() else {
        return Vec::new();
    };
    let threshold = top.score * params.cutoff_ratio;
    let kept = ranked
        .iter()
        .filter(|scored| scored.score >= threshold)
        .cloned()
        .collect::<Vec<_>>();
    if kept.len() < params.min_k {
        return ranked.iter().take(params.min_k).cloned().collect();
    }
    kept
}
