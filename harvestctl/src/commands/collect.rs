use clap::Args;
use harvest_core::collector::LaunchOverrides;
use harvest_core::{ConfigError, HarvestConfig};

/// Runs one collection over the configured listing.
#[derive(Args, Debug, Clone, Default)]
pub struct CollectArgs {
    /// Stop once this many records have been collected
    #[arg(short = 'm', long, value_name = "N")]
    pub max_items: Option<usize>,
    /// 1-based page to resume from
    #[arg(long, value_name = "PAGE")]
    pub start_page: Option<u32>,
    /// Records between checkpoints
    #[arg(long, value_name = "N")]
    pub checkpoint_size: Option<usize>,
    /// Listing URL loaded before the first page
    #[arg(long, value_name = "URL")]
    pub start_url: Option<String>,
    /// Show the browser window
    #[arg(long)]
    pub headful: bool,
    /// Leave checkpoints unmerged when the run ends
    #[arg(long = "no-combine")]
    pub no_combine: bool,
}

impl CollectArgs {
    /// Folds the flags into `config` and re-validates it.
    pub fn apply(&self, config: &mut HarvestConfig) -> Result<(), ConfigError> {
        let collection = &mut config.collection;
        if let Some(max_items) = self.max_items {
            collection.max_items = Some(max_items);
        }
        if let Some(start_page) = self.start_page {
            collection.start_page = start_page;
        }
        if let Some(size) = self.checkpoint_size {
            collection.checkpoint_size = size;
        }
        if let Some(url) = &self.start_url {
            collection.start_url = Some(url.clone());
        }
        config.validate()
    }

    pub fn launch_overrides(&self) -> LaunchOverrides {
        LaunchOverrides {
            headless: self.headful.then_some(false),
        }
    }
}
