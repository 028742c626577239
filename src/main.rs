use songbook_edge::{config::EdgeConfig, init_server, init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    init_tracing();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/songbook-edge.yaml".to_string());

    let config = match EdgeConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: songbook-edge [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = init_server(config).await {
        eprintln!("Edge error: {}", e);
        process::exit(1);
    }
}
