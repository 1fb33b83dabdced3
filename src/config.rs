use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

use crate::source::SourceSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Force the mock token source even when an API key is set
    #[arg(long, env = "MOCK_SOURCE")]
    pub mock: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Use the mock token source regardless of credentials.
    pub mock: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 30)?
            .set_default("source.mock", false)?;

        // 2. Optional config file; ./config.(yaml|toml|...) as a fallback
        builder = builder.add_source(File::with_name("config").required(false));
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        // 3. Environment variables (prefixed with CHAT_)
        // E.g. CHAT_SERVER__PORT=8000
        // prefix_separator keeps the CHAT_ spelling; without it the crate
        // derives CHAT__ from the key separator.
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides. clap's `env = ...` attributes mean these also
        // cover the unprefixed legacy variables (PORT, TIMEOUT_DISABLED).
        // Priority: CLI flag > CLI env var > CHAT_ env > file > defaults.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(mock) = cli.mock {
            builder = builder.set_override("source.mock", mock)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

/// Load token-source connection settings from the environment.
///
/// A missing or blank `LLM_API_KEY` is not an error: the application falls
/// back to the mock source, so it runs out of the box with no credentials.
pub fn load_source_settings() -> Result<SourceSettings, String> {
    let defaults = SourceSettings::default();

    let base_url = match env::var("LLM_BASE_URL") {
        Ok(v) if v.trim().is_empty() => return Err("LLM_BASE_URL cannot be empty".to_string()),
        Ok(v) => v,
        Err(_) => defaults.base_url,
    };

    let model = match env::var("LLM_MODEL") {
        Ok(v) if v.trim().is_empty() => return Err("LLM_MODEL cannot be empty".to_string()),
        Ok(v) => v,
        Err(_) => defaults.model,
    };

    let api_key = env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    Ok(SourceSettings {
        base_url,
        api_key,
        model,
    })
}
