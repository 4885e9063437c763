use std::path::PathBuf;

use ::tracing::{error, info_span};
use bbs_server::{config::ServerConfig, service::Service, tracing::setup_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => match ServerConfig::from_path(&path.to_string_lossy()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error loading config {}: {:?}", path.display(), err);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    setup_tracing(&config);

    let root_span = info_span!("bbs");
    let _guard = root_span.enter();

    let service = match Service::new(config) {
        Ok(service) => service,
        Err(err) => {
            error!("Error creating service: {:?}", err);
            return;
        }
    };
    if let Err(err) = service.start().await {
        error!("Error starting service: {:?}", err);
    }
}
