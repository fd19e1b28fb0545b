use unicode_normalization::UnicodeNormalization;

const MAX_BASE_TOKEN_CHARS: usize = 80;
const MIN_COMPOUND_PART_CHARS: usize = 2;
const MIN_BIGRAM_TOKEN_CHARS: usize = 2;
const MAX_BIGRAM_TOKEN_CHARS: usize = 40;

/// Splits text into normalized lexical tokens: maximal alphanumeric runs,
/// adjacent-pair compounds for alphabetic runs, and overlapping character
/// bigrams for runs carrying ideographic/syllabic scripts.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let base = base_tokens(&normalized);

    let mut tokens = Vec::with_capacity(base.len().saturating_mul(2));
    tokens.extend(base.iter().cloned());

    for pair in base.windows(2) {
        if is_compound_part(&pair[0]) && is_compound_part(&pair[1]) {
            tokens.push(format!("{}{}", pair[0], pair[1]));
        }
    }

    for token in &base {
        append_script_bigrams(token, &mut tokens);
    }

    tokens
}

/// Path variant: drops the trailing extension and treats separators as word
/// boundaries so every path segment contributes matchable terms.
#[must_use]
pub fn tokenize_path(path: &str) -> Vec<String> {
    let stem = strip_trailing_extension(path);
    let spaced = stem
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\') { ' ' } else { ch })
        .collect::<String>();
    tokenize(&spaced)
}

fn base_tokens(normalized: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in normalized.chars() {
        if ch.is_alphanumeric() {
            current.push(ch);
            continue;
        }
        push_base_token(&mut tokens, &mut current);
    }
    push_base_token(&mut tokens, &mut current);
    tokens
}

fn push_base_token(tokens: &mut Vec<String>, current: &mut String) {
    if current.is_empty() {
        return;
    }
    if current.chars().count() <= MAX_BASE_TOKEN_CHARS {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

fn is_compound_part(token: &str) -> bool {
    token.chars().count() >= MIN_COMPOUND_PART_CHARS && token.chars().all(char::is_alphabetic)
}

fn append_script_bigrams(token: &str, tokens: &mut Vec<String>) {
    if !token.chars().any(is_ideographic_or_syllabic) {
        return;
    }
    let chars = token.chars().collect::<Vec<_>>();
    if chars.len() < MIN_BIGRAM_TOKEN_CHARS || chars.len() > MAX_BIGRAM_TOKEN_CHARS {
        return;
    }
    for pair in chars.windows(2) {
        let mut bigram = String::with_capacity(8);
        bigram.push(pair[0]);
        bigram.push(pair[1]);
        tokens.push(bigram);
    }
}

const fn is_ideographic_or_syllabic(ch: char) -> bool {
    matches!(ch,
        '\u{1100}'..='\u{11FF}'     // Hangul Jamo
        | '\u{3040}'..='\u{309F}'   // Hiragana
        | '\u{30A0}'..='\u{30FF}'   // Katakana
        | '\u{3400}'..='\u{4DBF}'   // CJK Extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{AC00}'..='\u{D7AF}'   // Hangul Syllables
        | '\u{F900}'..='\u{FAFF}'   // CJK Compatibility Ideographs
    )
}

fn strip_trailing_extension(path: &str) -> &str {
    let segment_start = path.rfind(['/', '\\']).map_or(0, |idx| idx + 1);
    match path.rfind('.') {
        Some(dot) if dot > segment_start => &path[..dot],
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::{tokenize, tokenize_path};

    #[test]
    fn splits_alnum_runs_and_appends_compounds() {
        let tokens = tokenize("Heap-Sort v2!");
        assert_eq!(tokens, vec!["heap", "sort", "v2", "heapsort"]);
    }

    #[test]
    fn compound_requires_alphabetic_parts_of_two_chars() {
        assert_eq!(tokenize("a heap"), vec!["a", "heap"]);
        assert_eq!(tokenize("v2 sort"), vec!["v2", "sort"]);
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        assert_eq!(tokenize("ﬁle"), vec!["file"]);
    }

    #[test]
    fn oversized_runs_are_dropped() {
        let long = "x".repeat(81);
        let kept = "y".repeat(80);
        let tokens = tokenize(&format!("{long} {kept}"));
        assert_eq!(tokens, vec![kept]);
    }

    #[test]
    fn syllabic_tokens_emit_overlapping_bigrams() {
        let tokens = tokenize("데이터베이스");
        assert_eq!(tokens[0], "데이터베이스");
        assert_eq!(
            &tokens[1..],
            ["데이", "이터", "터베", "베이", "이스"]
        );
    }

    #[test]
    fn oversized_syllabic_token_keeps_base_but_skips_bigrams() {
        let token = "가".repeat(41);
        let tokens = tokenize(&token);
        assert_eq!(tokens, vec![token]);
    }

    #[test]
    fn path_variant_strips_extension_and_splits_segments() {
        let tokens = tokenize_path("Projects/Algo Notes/heap_sort.md");
        assert!(tokens.contains(&"projects".to_string()));
        assert!(tokens.contains(&"heap".to_string()));
        assert!(tokens.contains(&"sort".to_string()));
        assert!(tokens.contains(&"heapsort".to_string()));
        assert!(!tokens.contains(&"md".to_string()));
    }

    #[test]
    fn path_variant_keeps_dotfiles_whole() {
        assert!(tokenize_path("notes/.hidden").contains(&"hidden".to_string()));
        assert_eq!(tokenize_path(".gitignore"), vec!["gitignore"]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(tokenize("").is_empty());
        assert!(tokenize_path("").is_empty());
        assert!(tokenize("  \t\n ").is_empty());
    }
}
