//! Runtime configuration.
//!
//! Values come from a TOML file (path in `ASSESSMENT_CONFIG`, default
//! `assessment.toml`) with serde defaults for anything left out, then a few
//! environment overrides for deployment. A missing file is not an error.

use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "ASSESSMENT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "assessment.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for JSON request bodies, in bytes.
    pub json_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub booklet_dir: PathBuf,
    pub fonts_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pages rasterised below this resolution are upscaled before decoding.
    pub min_dpi: u32,
    /// Directory holding the pdfium shared library. The system library path
    /// is searched when unset.
    pub pdfium_library: Option<PathBuf>,
    /// A claim whose worker has not reported for this long may be released.
    pub claim_lease_secs: u64,
    /// Finished ingest jobs stay queryable for this long.
    pub job_ttl_secs: u64,
}

/// External OCR program. `{input}` in `args` is replaced by the page image path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            scan: ScanConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            json_limit: 10 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("assessment.sqlite"),
            upload_dir: PathBuf::from("./uploads"),
            booklet_dir: PathBuf::from("./booklets"),
            fonts_dir: PathBuf::from("./fonts"),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_dpi: 200,
            pdfium_library: None,
            claim_lease_secs: 600,
            job_ttl_secs: 3600,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: Some("tesseract".to_string()),
            args: vec!["{input}".to_string(), "stdout".to_string()],
        }
    }
}

impl ScanConfig {
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }
}

impl AppConfig {
    /// Loads the configuration file named by `ASSESSMENT_CONFIG` and applies
    /// environment overrides.
    pub fn load() -> Result<Self, String> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let config = Self::from_toml(&text)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("Invalid configuration: {}", e))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ASSESSMENT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ASSESSMENT_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid ASSESSMENT_PORT value '{}'", port),
            }
        }
        if let Ok(db) = std::env::var("ASSESSMENT_DB") {
            self.storage.database_path = PathBuf::from(db);
        }
    }
}
