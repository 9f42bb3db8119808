//! Application configuration.
//!
//! Settings come from environment variables, optionally layered on top of a
//! TOML file. The file is looked up via `IBP_CONFIG`, then in the standard
//! locations (`ibp.toml`, `backend/ibp.toml`, `../ibp.toml`). Environment
//! variables always win over file values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SegmentationError, SegmentationResult};
use crate::models::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS, DEFAULT_MIN_PERIODS, DEFAULT_PERIOD_FIELD,
    DEFAULT_X_THRESHOLD, DEFAULT_Y_THRESHOLD,
};
use crate::sap::BackendType;

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sap: SapSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub write: WriteSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Connection settings for the planning system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SapSettings {
    /// `odata` or `local`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// OData entity set URL used for reads.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Service root of the planning data import API.
    #[serde(default)]
    pub write_api_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub planning_area: Option<String>,
    /// Key figure receiving the segment letter.
    #[serde(default)]
    pub key_figure: Option<String>,
    /// Emit `<key_figure>_isNull` in write payloads.
    #[serde(default)]
    pub enable_null_handling: bool,
    /// JSON file of observations served by the local backend.
    #[serde(default)]
    pub local_data: Option<PathBuf>,
}

impl Default for SapSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_url: None,
            write_api_url: None,
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            planning_area: None,
            key_figure: None,
            enable_null_handling: false,
            local_data: None,
        }
    }
}

impl SapSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backend_type(&self) -> SegmentationResult<BackendType> {
        self.backend.parse().map_err(SegmentationError::Configuration)
    }
}

/// Default analysis thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default = "default_x_threshold")]
    pub x_threshold: f64,
    #[serde(default = "default_y_threshold")]
    pub y_threshold: f64,
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            x_threshold: DEFAULT_X_THRESHOLD,
            y_threshold: DEFAULT_Y_THRESHOLD,
            min_periods: DEFAULT_MIN_PERIODS,
        }
    }
}

/// Write-back defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_period_field")]
    pub period_field: String,
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            period_field: default_period_field(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_backend() -> String {
    "odata".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_x_threshold() -> f64 {
    DEFAULT_X_THRESHOLD
}

fn default_y_threshold() -> f64 {
    DEFAULT_Y_THRESHOLD
}

fn default_min_periods() -> usize {
    DEFAULT_MIN_PERIODS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_period_field() -> String {
    DEFAULT_PERIOD_FIELD.to_string()
}

/// Which write-back settings are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub status: String,
    pub configured: BTreeMap<String, bool>,
    pub missing: Vec<String>,
    pub planning_area: Option<String>,
    pub key_figure: Option<String>,
    pub null_handling_enabled: bool,
    pub backend: String,
}

impl AppConfig {
    /// Load configuration from environment variables only.
    ///
    /// # Environment Variables
    /// - `SAP_API_URL`, `SAP_WRITE_API_URL`, `SAP_USERNAME`, `SAP_PASSWORD`
    /// - `SAP_TIMEOUT` (seconds, default 30)
    /// - `SAP_PLANNING_AREA`, `SAP_XYZ_KEY_FIGURE`
    /// - `SAP_ENABLE_NULL_HANDLING` (default false)
    /// - `DEFAULT_X_THRESHOLD`, `DEFAULT_Y_THRESHOLD`, `DEFAULT_MIN_PERIODS`
    /// - `DEFAULT_BATCH_SIZE`, `DEFAULT_MAX_WORKERS`, `DEFAULT_PERIOD_FIELD`
    /// - `IBP_BACKEND` (`odata` | `local`), `IBP_LOCAL_DATA`
    /// - `HOST`, `PORT`
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> SegmentationResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SegmentationResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            SegmentationError::configuration(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            SegmentationError::configuration(format!("Failed to parse config file: {}", e))
        })
    }

    /// File (when one is found) overlaid with environment variables.
    pub fn load() -> SegmentationResult<Self> {
        let mut config = match Self::locate_file() {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn locate_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("IBP_CONFIG") {
            return Some(PathBuf::from(path));
        }
        [
            PathBuf::from("ibp.toml"),
            PathBuf::from("backend/ibp.toml"),
            PathBuf::from("../ibp.toml"),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    /// Overlay values produced by `lookup` (an environment reader in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> SegmentationResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("HOST") {
            self.server.host = v;
        }
        if let Some(v) = text("PORT") {
            self.server.port = parse_var("PORT", &v)?;
        }

        if let Some(v) = text("IBP_BACKEND") {
            self.sap.backend = v;
        }
        if let Some(v) = text("IBP_LOCAL_DATA") {
            self.sap.local_data = Some(PathBuf::from(v));
        }
        if let Some(v) = text("SAP_API_URL") {
            self.sap.api_url = Some(v);
        }
        if let Some(v) = text("SAP_WRITE_API_URL") {
            self.sap.write_api_url = Some(v);
        }
        if let Some(v) = text("SAP_USERNAME") {
            self.sap.username = Some(v);
        }
        if let Some(v) = text("SAP_PASSWORD") {
            self.sap.password = Some(v);
        }
        if let Some(v) = text("SAP_TIMEOUT") {
            self.sap.timeout_secs = parse_var("SAP_TIMEOUT", &v)?;
        }
        if let Some(v) = text("SAP_PLANNING_AREA") {
            self.sap.planning_area = Some(v);
        }
        if let Some(v) = text("SAP_XYZ_KEY_FIGURE") {
            self.sap.key_figure = Some(v);
        }
        if let Some(v) = text("SAP_ENABLE_NULL_HANDLING") {
            self.sap.enable_null_handling = parse_flag(&v);
        }

        if let Some(v) = text("DEFAULT_X_THRESHOLD") {
            self.analysis.x_threshold = parse_var("DEFAULT_X_THRESHOLD", &v)?;
        }
        if let Some(v) = text("DEFAULT_Y_THRESHOLD") {
            self.analysis.y_threshold = parse_var("DEFAULT_Y_THRESHOLD", &v)?;
        }
        if let Some(v) = text("DEFAULT_MIN_PERIODS") {
            self.analysis.min_periods = parse_var("DEFAULT_MIN_PERIODS", &v)?;
        }

        if let Some(v) = text("DEFAULT_BATCH_SIZE") {
            self.write.batch_size = parse_var("DEFAULT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = text("DEFAULT_MAX_WORKERS") {
            self.write.max_workers = parse_var("DEFAULT_MAX_WORKERS", &v)?;
        }
        if let Some(v) = text("DEFAULT_PERIOD_FIELD") {
            self.write.period_field = v;
        }

        Ok(())
    }

    /// Report which write-back settings are configured.
    pub fn validate_write_settings(&self) -> ConfigValidation {
        let sap = &self.sap;
        let local = matches!(sap.backend_type(), Ok(BackendType::Local));
        let present = |v: &Option<String>| v.as_deref().map(|s| !s.is_empty()).unwrap_or(false);

        let mut configured = BTreeMap::new();
        configured.insert("SAP_API_URL".to_string(), present(&sap.api_url));
        configured.insert("SAP_WRITE_API_URL".to_string(), present(&sap.write_api_url));
        configured.insert("SAP_USERNAME".to_string(), present(&sap.username));
        configured.insert("SAP_PASSWORD".to_string(), present(&sap.password));
        configured.insert("SAP_PLANNING_AREA".to_string(), present(&sap.planning_area));
        configured.insert("SAP_XYZ_KEY_FIGURE".to_string(), present(&sap.key_figure));

        // The local backend needs no credentials, only the payload settings.
        let required: &[&str] = if local {
            &["SAP_PLANNING_AREA", "SAP_XYZ_KEY_FIGURE"]
        } else {
            &[
                "SAP_WRITE_API_URL",
                "SAP_USERNAME",
                "SAP_PASSWORD",
                "SAP_PLANNING_AREA",
                "SAP_XYZ_KEY_FIGURE",
            ]
        };
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !configured.get(**key).copied().unwrap_or(false))
            .map(|key| key.to_string())
            .collect();

        ConfigValidation {
            status: if missing.is_empty() { "valid" } else { "incomplete" }.to_string(),
            configured,
            missing,
            planning_area: sap.planning_area.clone(),
            key_figure: sap.key_figure.clone(),
            null_handling_enabled: sap.enable_null_handling,
            backend: sap.backend.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> SegmentationResult<T> {
    value.trim().parse().map_err(|_| {
        SegmentationError::configuration(format!("{} has an invalid value: {}", key, value))
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
