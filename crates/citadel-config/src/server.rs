use std::path::PathBuf;

/// Server bind and state-directory configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Directory for persisted state: adapter version blobs, pending
    /// fixes, and the heal audit log
    pub state_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8084,
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var_os("CITADEL_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::home_dir().map(|home| home.join(".citadel")))
        .unwrap_or_else(|| PathBuf::from(".citadel"))
        .join("state")
}
