use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Live timing feed gateway", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LIVETIMING_PORT", help = "Port to listen on for downstream client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "LIVETIMING_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVETIMING_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVETIMING_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVETIMING_NEGOTIATE_URL", help = "Base URL of the upstream negotiation endpoint.")]
    pub negotiate_url: Option<String>,

    #[clap(long, env = "LIVETIMING_STREAM_URL", help = "Base URL of the upstream streaming endpoint.")]
    pub stream_url: Option<String>,

    #[clap(long, env = "LIVETIMING_RETRY_DELAY_MS", help = "Fixed delay in milliseconds between upstream reconnect attempts.")]
    pub retry_delay_ms: Option<u64>,

    #[clap(long, env = "LIVETIMING_INACTIVITY_TIMEOUT_SECONDS", help = "Seconds of upstream silence before the connection is considered dead.")]
    pub inactivity_timeout_seconds: Option<u64>,

    #[clap(long, env = "LIVETIMING_TESTING", help = "Skip upstream negotiation and use a canned session (test mode).")]
    pub testing: Option<bool>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            negotiate_url: other.negotiate_url.or(self.negotiate_url),
            stream_url: other.stream_url.or(self.stream_url),
            retry_delay_ms: other.retry_delay_ms.or(self.retry_delay_ms),
            inactivity_timeout_seconds: other
                .inactivity_timeout_seconds
                .or(self.inactivity_timeout_seconds),
            testing: other.testing.or(self.testing),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// Settings consumed by the sync engine.
    pub fn feed_config(&self) -> lib_timing::FeedConfig {
        let defaults = lib_timing::FeedConfig::default();
        lib_timing::FeedConfig {
            negotiate_url: self
                .negotiate_url
                .clone()
                .unwrap_or(defaults.negotiate_url),
            stream_url: self.stream_url.clone().unwrap_or(defaults.stream_url),
            retry_delay: self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            inactivity_timeout: self
                .inactivity_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_timeout),
            testing: self.testing.unwrap_or(false),
        }
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(4000),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        negotiate_url: Some("https://livetiming.formula1.com/signalr".to_string()),
        stream_url: Some("wss://livetiming.formula1.com/signalr".to_string()),
        retry_delay_ms: Some(1000),
        inactivity_timeout_seconds: Some(60),
        testing: Some(false),
        ..Default::default()
    };

    // 2. Load from config file (server_livetiming.conf) if present.
    //    Allow overriding default config file path with CLI arg.
    let cli_args_for_path = Config::parse(); // Parse CLI to get potential config_path override early

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_livetiming.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments.
    //    clap::Parser handles env vars and CLI args in one pass; merge
    //    them over the file config.
    current_config = current_config.merge(cli_args_for_path);

    // 4. Apply default TLS paths if not already set
    if current_config.tls_cert_path.is_none() || current_config.tls_key_path.is_none() {
        if let Some(home_dir) = dirs::home_dir() {
            let letsencrypt_dir = home_dir.join(".letsencrypt");
            if current_config.tls_cert_path.is_none() {
                current_config.tls_cert_path = Some(letsencrypt_dir.join("fullchain.pem"));
            }
            if current_config.tls_key_path.is_none() {
                current_config.tls_key_path = Some(letsencrypt_dir.join("privkey.pem"));
            }
        } else {
            log::warn!("Could not determine home directory for default TLS paths.");
        }
    }

    current_config
}
