use clap::Args;

/// Merges checkpoint artifacts into one deduplicated file.
#[derive(Args, Debug, Clone, Default)]
pub struct CombineArgs {
    /// Artifact name prefix to merge (defaults to checkpoint.checkpoint_prefix)
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,
    /// Label of the combined artifact (defaults to checkpoint.combined_prefix)
    #[arg(long, value_name = "LABEL")]
    pub output: Option<String>,
}
