use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Invalid MIRROR_LOG_FORMAT: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Sleep between polls of a worker's event queue when it is empty
    pub poll_interval_ms: u64,

    /// Initial working directory; relative paths in commands resolve against it
    pub home_dir: PathBuf,

    /// Marker file created at startup and removed on clean shutdown
    pub state_file: PathBuf,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            home_dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            state_file: std::env::temp_dir().join("backup-mirror.state"),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load config from `.env` and environment variables
    pub fn load() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(interval) = std::env::var("MIRROR_POLL_INTERVAL_MS") {
            config.poll_interval_ms = interval
                .parse()
                .with_context(|| format!("Invalid MIRROR_POLL_INTERVAL_MS: {}", interval))?;
        }

        if let Ok(home) = std::env::var("MIRROR_HOME") {
            config.home_dir = PathBuf::from(home);
        }

        if let Ok(state_file) = std::env::var("MIRROR_STATE_FILE") {
            config.state_file = PathBuf::from(state_file);
        }

        if let Ok(format) = std::env::var("MIRROR_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        if config.poll_interval_ms == 0 {
            anyhow::bail!("MIRROR_POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
