//! Token-streaming chat server entry point.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chat_stream::config::{AppConfig, load_source_settings};
use chat_stream::server::start_server;
use chat_stream::source::build_source;

#[tokio::main]
async fn main() {
    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let settings = match load_source_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        name: "source.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        has_key = settings.api_key.is_some(),
        "Token source configuration loaded"
    );

    let source = build_source(&settings, config.source.mock);

    if let Err(e) = start_server(config, source).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
