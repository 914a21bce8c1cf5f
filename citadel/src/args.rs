use std::path::PathBuf;

use clap::Parser;

/// Sovereignty gateway for AI providers
#[derive(Debug, Parser)]
#[command(name = "citadel", version, about)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}

fn default_config_path() -> PathBuf {
    std::env::var_os("CITADEL_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::home_dir().map(|home| home.join(".citadel")))
        .unwrap_or_else(|| PathBuf::from(".citadel"))
        .join("config.toml")
}
