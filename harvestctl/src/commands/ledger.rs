use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct FailuresArgs {
    /// Maximum number of entries, newest first
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Only show failures from this run
    #[arg(long, value_name = "UUID")]
    pub run_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunsArgs {
    /// Maximum number of runs, newest first
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Only show failed runs
    #[arg(long)]
    pub failed: bool,
}
