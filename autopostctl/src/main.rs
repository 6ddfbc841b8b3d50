use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = autopostctl::Cli::parse();
    if let Err(err) = autopostctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
