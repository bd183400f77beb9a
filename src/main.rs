mod certificate;
mod cli;
mod config;
mod error;
mod handlers;
mod inference;
mod logging;
mod manifest;
mod models;
mod policy;
mod prediction;
mod preprocess;
mod server;
mod state;

use clap::Parser;

#[actix_web::main]
async fn main() {
    let cli = cli::Cli::parse();
    logging::init_tracing(cli.verbose);

    if let Err(e) = cli::run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
