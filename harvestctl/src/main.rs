use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = harvestctl::Cli::parse();
    if let Err(err) = harvestctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
