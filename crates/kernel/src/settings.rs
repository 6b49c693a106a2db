use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::Deserialize;

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "SHELF_ENV";
const CONFIG_DIR_ENV: &str = "SHELF_CONFIG_DIR";

/// Overrides `storage.table_name` when set.
pub const TABLE_NAME_ENV: &str = "SHELF_TABLE_NAME";

/// Table used when neither configuration nor environment names one.
pub const DEFAULT_TABLE_NAME: &str = "books-table";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, environment overlay
    /// and `SHELF_*` variables.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .context("unable to resolve current directory")?
                .join("config"),
        };

        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment));

        let builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix("SHELF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = match environment.as_str() {
            "local" => Environment::Local,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                return Err(anyhow!(
                    "unsupported environment '{}'; expected local/staging/production",
                    other
                ));
            }
        };

        if let Ok(table_name) = std::env::var(TABLE_NAME_ENV) {
            settings.storage.apply_table_name(&table_name);
        }

        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Key-value storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "StorageSettings::default_table_name")]
    pub table_name: String,
    /// JSON snapshot written after every mutation. In-memory only when unset.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// How long a freshly created table stays in `CREATING`.
    #[serde(default)]
    pub provisioning_delay_ms: u64,
    #[serde(default = "StorageSettings::default_wait_interval_ms")]
    pub wait_interval_ms: u64,
    #[serde(default = "StorageSettings::default_wait_max_attempts")]
    pub wait_max_attempts: u32,
    #[serde(default = "StorageSettings::default_scan_page_size")]
    pub scan_page_size: usize,
}

impl StorageSettings {
    fn default_table_name() -> String {
        DEFAULT_TABLE_NAME.to_string()
    }

    fn default_wait_interval_ms() -> u64 {
        50
    }

    fn default_wait_max_attempts() -> u32 {
        40
    }

    fn default_scan_page_size() -> usize {
        100
    }

    /// Blank names are ignored so an empty variable falls back to the configured table.
    fn apply_table_name(&mut self, table_name: &str) {
        let table_name = table_name.trim();
        if !table_name.is_empty() {
            self.table_name = table_name.to_string();
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            table_name: Self::default_table_name(),
            snapshot_path: None,
            provisioning_delay_ms: 0,
            wait_interval_ms: Self::default_wait_interval_ms(),
            wait_max_attempts: Self::default_wait_max_attempts(),
            scan_page_size: Self::default_scan_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "TelemetrySettings::default_log_filter")]
    pub log_filter: String,
}

impl TelemetrySettings {
    fn default_log_filter() -> String {
        "info,tower_http=debug".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
