use crate::index::DEFAULT_RESCAN_THRESHOLD;
use crate::remote::RemoteConfig;
use crate::retrieval::SelectionParams;

const ENV_TOP_N: &str = "LOREKEEPER_TOP_N";
const ENV_CUTOFF_RATIO: &str = "LOREKEEPER_CUTOFF_RATIO";
const ENV_MIN_K: &str = "LOREKEEPER_MIN_K";
const ENV_BM25_K1: &str = "LOREKEEPER_BM25_K1";
const ENV_BM25_B: &str = "LOREKEEPER_BM25_B";
const ENV_CAPACITY_TARGET: &str = "LOREKEEPER_CAPACITY_TARGET";
const ENV_PROTECTED_CAPACITY: &str = "LOREKEEPER_PROTECTED_CAPACITY";
const ENV_RESCAN_THRESHOLD: &str = "LOREKEEPER_RESCAN_THRESHOLD";
const ENV_CARRY_LIMIT: &str = "LOREKEEPER_CARRY_LIMIT";
const ENV_INCLUDE_GLOBS: &str = "LOREKEEPER_INCLUDE_GLOBS";

const DEFAULT_CAPACITY_TARGET: usize = 300;
const DEFAULT_PROTECTED_CAPACITY: usize = 64;
const DEFAULT_CARRY_LIMIT: usize = 10;

/// Runtime knobs for one vault. Every numeric override falls back to its
/// default silently when unset, unparsable, or under the floor; only the
/// remote block can be absent entirely.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub selection: SelectionParams,
    pub capacity_target: usize,
    pub protected_capacity: usize,
    pub rescan_threshold: u32,
    pub carry_limit: usize,
    pub include_globs: Vec<String>,
    pub remote: Option<RemoteConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selection: SelectionParams::default(),
            capacity_target: DEFAULT_CAPACITY_TARGET,
            protected_capacity: DEFAULT_PROTECTED_CAPACITY,
            rescan_threshold: DEFAULT_RESCAN_THRESHOLD,
            carry_limit: DEFAULT_CARRY_LIMIT,
            include_globs: default_globs(),
            remote: None,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            selection: SelectionParams {
                top_n: read_env_usize(ENV_TOP_N, defaults.selection.top_n, 1),
                cutoff_ratio: read_env_ratio(ENV_CUTOFF_RATIO, defaults.selection.cutoff_ratio),
                min_k: read_env_usize(ENV_MIN_K, defaults.selection.min_k, 0),
                k1: read_env_f32(ENV_BM25_K1, defaults.selection.k1, 0.0),
                b: read_env_ratio(ENV_BM25_B, defaults.selection.b),
            },
            capacity_target: read_env_usize(ENV_CAPACITY_TARGET, defaults.capacity_target, 1),
            protected_capacity: read_env_usize(
                ENV_PROTECTED_CAPACITY,
                defaults.protected_capacity,
                1,
            ),
            rescan_threshold: read_env_u32(ENV_RESCAN_THRESHOLD, defaults.rescan_threshold, 0),
            carry_limit: read_env_usize(ENV_CARRY_LIMIT, defaults.carry_limit, 0),
            include_globs: parse_globs(std::env::var(ENV_INCLUDE_GLOBS).ok().as_deref()),
            remote: RemoteConfig::from_env(),
        }
    }
}

fn default_globs() -> Vec<String> {
    vec!["*.md".to_string(), "*.txt".to_string()]
}

fn read_env_usize(name: &str, default_value: usize, min_value: usize) -> usize {
    parse_usize(
        std::env::var(name).ok().as_deref(),
        default_value,
        min_value,
    )
}

fn read_env_u32(name: &str, default_value: u32, min_value: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

fn read_env_f32(name: &str, default_value: f32, min_value: f32) -> f32 {
    parse_f32(
        std::env::var(name).ok().as_deref(),
        default_value,
        min_value,
    )
}

fn read_env_ratio(name: &str, default_value: f32) -> f32 {
    parse_ratio(std::env::var(name).ok().as_deref(), default_value)
}

fn parse_usize(raw: Option<&str>, default_value: usize, min_value: usize) -> usize {
    raw.and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

fn parse_f32(raw: Option<&str>, default_value: f32, min_value: f32) -> f32 {
    raw.and_then(|raw| raw.trim().parse::<f32>().ok())
        .filter(|value| value.is_finite() && *value >= min_value)
        .unwrap_or(default_value)
}

fn parse_ratio(raw: Option<&str>, default_value: f32) -> f32 {
    raw.and_then(|raw| raw.trim().parse::<f32>().ok())
        .filter(|value| (0.0..=1.0).contains(value))
        .unwrap_or(default_value)
}

fn parse_globs(raw: Option<&str>) -> Vec<String> {
    let globs = raw
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|pattern| !pattern.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if globs.is_empty() { default_globs() } else { globs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_knob() {
        let config = AppConfig::default();
        assert_eq!(config.capacity_target, 300);
        assert_eq!(config.protected_capacity, 64);
        assert_eq!(config.rescan_threshold, 50);
        assert_eq!(config.carry_limit, 10);
        assert_eq!(config.include_globs, ["*.md", "*.txt"]);
        assert!(config.remote.is_none());
    }

    #[test]
    fn numeric_overrides_below_the_floor_fall_back() {
        assert_eq!(parse_usize(Some("0"), 15, 1), 15);
        assert_eq!(parse_usize(Some("7"), 15, 1), 7);
        assert_eq!(parse_usize(Some("  12  "), 15, 1), 12);
        assert_eq!(parse_usize(Some("not-a-number"), 15, 1), 15);
        assert_eq!(parse_usize(None, 15, 1), 15);
    }

    #[test]
    fn float_overrides_reject_nan_and_negatives() {
        assert_eq!(parse_f32(Some("1.6"), 1.2, 0.0), 1.6);
        assert_eq!(parse_f32(Some("-0.5"), 1.2, 0.0), 1.2);
        assert_eq!(parse_f32(Some("NaN"), 1.2, 0.0), 1.2);
    }

    #[test]
    fn ratios_must_stay_within_the_unit_interval() {
        assert_eq!(parse_ratio(Some("0.5"), 0.4), 0.5);
        assert_eq!(parse_ratio(Some("1.0"), 0.4), 1.0);
        assert_eq!(parse_ratio(Some("1.5"), 0.4), 0.4);
        assert_eq!(parse_ratio(Some("-0.1"), 0.4), 0.4);
    }

    #[test]
    fn glob_lists_split_on_commas_and_never_end_up_empty() {
        assert_eq!(parse_globs(Some("*.md, *.rst ,")), ["*.md", "*.rst"]);
        assert_eq!(parse_globs(Some("  ,  ")), ["*.md", "*.txt"]);
        assert_eq!(parse_globs(None), ["*.md", "*.txt"]);
    }
}
