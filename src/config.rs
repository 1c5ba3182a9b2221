use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    /// Scratch directories for each job are created below this root.
    pub download_root: PathBuf,
    pub http_port: u16,
    pub status_interval_ms: u64,
    pub status_message_delay_ms: u64,
    pub status_delete_delay_ms: u64,
    #[serde(default)]
    pub notify_urls: Vec<String>,
    #[serde(default)]
    pub blocked_url_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_filename_patterns: Vec<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let builder = Self::defaults()?
            // Config file (optional)
            .add_source(File::with_name("config").required(false))
            // Environment variables (e.g. MIRROR_DOWNLOAD_ROOT=/data/downloads)
            .add_source(
                Environment::with_prefix("MIRROR")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("notify_urls")
                    .with_list_parse_key("blocked_url_patterns")
                    .with_list_parse_key("blocked_filename_patterns"),
            );

        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("log_level", "info")?
            .set_default("download_root", "./downloads")?
            .set_default("http_port", 3000)?
            .set_default("status_interval_ms", 12_000)?
            .set_default("status_message_delay_ms", 1_000)?
            .set_default("status_delete_delay_ms", 10_000)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn status_message_delay(&self) -> Duration {
        Duration::from_millis(self.status_message_delay_ms)
    }

    pub fn status_delete_delay(&self) -> Duration {
        Duration::from_millis(self.status_delete_delay_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            download_root: PathBuf::from("./downloads"),
            http_port: 3000,
            status_interval_ms: 12_000,
            status_message_delay_ms: 1_000,
            status_delete_delay_ms: 10_000,
            notify_urls: Vec::new(),
            blocked_url_patterns: Vec::new(),
            blocked_filename_patterns: Vec::new(),
        }
    }
}
