use clap::Args;

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(allow_hyphen_values = true)]
    pub query: String,
    /// Upload the selected documents to the remote store before answering.
    #[arg(long, default_value_t = false)]
    pub mirror: bool,
    /// Cap on ranked results before the score cutoff.
    #[arg(long, value_parser = parse_top_n)]
    pub top_n: Option<usize>,
    /// Drop results scoring below `top score * ratio`.
    #[arg(long, value_parser = parse_cutoff_ratio)]
    pub cutoff_ratio: Option<f32>,
    /// Keep at least this many heads when the cutoff is too aggressive.
    #[arg(long)]
    pub min_k: Option<usize>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct EvictionArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

fn parse_top_n(raw: &str) -> std::result::Result<usize, String> {
    let value = raw
        .parse::<usize>()
        .map_err(|_| format!("invalid integer value '{raw}'"))?;
    if value == 0 {
        return Err("top-n must be >= 1".to_string());
    }
    Ok(value)
}

fn parse_cutoff_ratio(raw: &str) -> std::result::Result<f32, String> {
    let value = raw
        .parse::<f32>()
        .map_err(|_| format!("invalid float value '{raw}'"))?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(format!(
            "cutoff ratio must be within [0.0, 1.0], got {value}"
        ));
    }
    Ok(value)
}
