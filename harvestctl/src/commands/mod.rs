mod collect;
mod combine;
mod ledger;

pub use collect::CollectArgs;
pub use combine::CombineArgs;
pub use ledger::{FailuresArgs, RunsArgs};
