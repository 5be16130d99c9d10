//! Configuration loading and root folder resolution
//!
//! Every service loads one [`Config`] at startup and passes it (or the
//! section it needs) by reference into component constructors. Nothing reads
//! configuration after startup.
//!
//! Config file priority:
//! 1. Command-line argument (highest priority)
//! 2. `EVPARK_CONFIG` environment variable
//! 3. `<config dir>/evpark/evpark.toml`, then `/etc/evpark/evpark.toml` on Linux
//! 4. Built-in defaults
//!
//! Root folder priority: CLI → `EVPARK_ROOT_FOLDER` → TOML `root_folder` →
//! OS-dependent default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::evidence::EvidenceLayout;
use crate::{Error, Result};

pub const CONFIG_ENV_VAR: &str = "EVPARK_CONFIG";
pub const ROOT_FOLDER_ENV_VAR: &str = "EVPARK_ROOT_FOLDER";

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for relative paths (database, evidence zones)
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub anpr: AnprConfig,
    pub cameras: Vec<CameraConfig>,
    pub classifier: ClassifierConfig,
    pub vendor: VendorConfig,
    pub reconciler: ReconcilerConfig,
    pub telemetry: TelemetryConfig,
    pub server: ServerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Monitoring store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, relative to the root folder unless absolute
    pub path: PathBuf,
    /// Attempts for one batch commit before giving up
    pub commit_max_attempts: u32,
    /// First backoff after a lock conflict; doubled per attempt
    pub commit_initial_backoff_ms: u64,
    pub commit_max_backoff_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("evpark.db"),
            commit_max_attempts: 5,
            commit_initial_backoff_ms: 1000,
            commit_max_backoff_ms: 8000,
        }
    }
}

/// Evidence zone directories, relative to the root folder unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub pending: PathBuf,
    pub confirmed: PathBuf,
    pub misrecognized: PathBuf,
    pub uncertain: PathBuf,
    pub errors: PathBuf,
    /// Daily `predictions.jsonl` files are appended below this directory
    pub predictions_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pending: PathBuf::from("anpr_img/TEMP"),
            confirmed: PathBuf::from("anpr_img/CAR"),
            misrecognized: PathBuf::from("anpr_img/MISRECOG"),
            uncertain: PathBuf::from("ev_detect/uncertain_cases"),
            errors: PathBuf::from("ev_detect/error_cases"),
            predictions_log: PathBuf::from("ev_detect/logs/comprehensive_predictions"),
        }
    }
}

/// Camera pipeline settings shared by all streams
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnprConfig {
    /// Base URL of the plate recognition service
    pub recognizer_url: String,
    /// Engine option string passed through on every call
    pub recognizer_options: String,
    /// Debounce window capacity N
    pub plate_window_size: usize,
    /// Debounce firing threshold T (must be <= N)
    pub plate_count_threshold: usize,
    /// Back-off before reopening a disconnected source
    pub reconnect_delay_secs: u64,
    /// Concurrent evidence writes per stream
    pub evidence_writers: usize,
    /// Bounded queue between a stream and its classification stage
    pub detection_queue_capacity: usize,
}

impl Default for AnprConfig {
    fn default() -> Self {
        Self {
            recognizer_url: "http://127.0.0.1:5790".to_string(),
            recognizer_options: "v".to_string(),
            plate_window_size: 10,
            plate_count_threshold: 5,
            reconnect_delay_secs: 5,
            evidence_writers: 4,
            detection_queue_capacity: 32,
        }
    }
}

/// One camera stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    /// HTTP endpoint returning a JPEG snapshot
    pub snapshot_url: String,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Region of interest as `[y1, y2, x1, x2]` ratios of the frame
    #[serde(default)]
    pub roi: Option<[f32; 4]>,
}

fn default_frame_interval_ms() -> u64 {
    200
}

/// Powertrain classification ensemble settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub primary_model_path: PathBuf,
    pub fallback_model_path: PathBuf,
    /// Primary probability below this triggers the fallback model
    pub confidence_threshold: f32,
    /// Wall-clock SLA for one attempt
    pub max_processing_time_ms: u64,
    /// Retries after the first failed attempt
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Plate crop is resized to `[width, height]` before feature extraction
    pub target_size: [u32; 2],
    /// When set, frames must have exactly this `[width, height]`;
    /// unset accepts arbitrary ROI frames
    pub required_resolution: Option<[u32; 2]>,
    pub save_uncertain_image: bool,
    pub save_error_image: bool,
    /// Resize diagnostic images to `[width, height]` before saving
    pub saved_image_size: Option<[u32; 2]>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            primary_model_path: PathBuf::from("models/primary.json"),
            fallback_model_path: PathBuf::from("models/fallback.json"),
            confidence_threshold: 0.45,
            max_processing_time_ms: 1000,
            retry_count: 2,
            retry_delay_ms: 100,
            target_size: [320, 180],
            required_resolution: None,
            save_uncertain_image: true,
            save_error_image: true,
            saved_image_size: None,
        }
    }
}

/// Third-party parking location service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Full URL of the "parking location by 4 digits" endpoint
    pub location_url: String,
    pub user_id: String,
    pub password: String,
    pub lot_area_no: i64,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    /// Upper bound on in-flight lookups during one pass
    pub max_concurrent_lookups: usize,
    /// Transient locations (tower / elevator slots) never stored as positions
    pub disallowed_locations: Vec<String>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            location_url: String::new(),
            user_id: String::new(),
            password: String::new(),
            lot_area_no: 0,
            timeout_secs: 10,
            requests_per_second: 10,
            max_concurrent_lookups: 4,
            disallowed_locations: vec!["타워".to_string()],
        }
    }
}

/// Lifecycle reconciler schedule and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// Pending cases older than this without a vendor match are cancelled
    pub auto_exit_minutes: i64,
    /// Maximum files per misrecognized directory shard
    pub misrecognized_dir_cap: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            auto_exit_minutes: 30,
            misrecognized_dir_cap: 10_000,
        }
    }
}

/// Optional dashboard sink for pass summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Endpoint accepting `{ts, values}` JSON; unset disables publishing
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 5,
        }
    }
}

/// HTTP bind address of the sync service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load using the priority order in the module docs
    ///
    /// An explicitly requested file (CLI or env) that cannot be read is an
    /// error; a missing default file falls back to built-in defaults.
    pub fn locate_and_load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!("Loading config from command line path {}", path.display());
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!("Loading config from {}={}", CONFIG_ENV_VAR, path);
            return Self::load(Path::new(&path));
        }

        if let Some(path) = default_config_file() {
            info!("Loading config from {}", path.display());
            return Self::load(&path);
        }

        warn!("No config file found, using built-in defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> Result<()> {
        let anpr = &self.anpr;
        if anpr.plate_window_size == 0 {
            return Err(Error::Config("anpr.plate_window_size must be > 0".to_string()));
        }
        if anpr.plate_count_threshold == 0 {
            return Err(Error::Config("anpr.plate_count_threshold must be > 0".to_string()));
        }
        if anpr.plate_count_threshold > anpr.plate_window_size {
            return Err(Error::Config(format!(
                "anpr.plate_count_threshold ({}) exceeds anpr.plate_window_size ({}); no plate could ever be confirmed",
                anpr.plate_count_threshold, anpr.plate_window_size
            )));
        }
        if anpr.evidence_writers == 0 || anpr.detection_queue_capacity == 0 {
            return Err(Error::Config(
                "anpr.evidence_writers and anpr.detection_queue_capacity must be > 0".to_string(),
            ));
        }

        for camera in &self.cameras {
            if let Some([y1, y2, x1, x2]) = camera.roi {
                let in_range = [y1, y2, x1, x2].iter().all(|v| (0.0..=1.0).contains(v));
                if !in_range || y1 >= y2 || x1 >= x2 {
                    return Err(Error::Config(format!(
                        "camera {}: roi must be [y1, y2, x1, x2] ratios with y1 < y2 and x1 < x2",
                        camera.name
                    )));
                }
            }
        }

        let classifier = &self.classifier;
        if !(0.0..=1.0).contains(&classifier.confidence_threshold) {
            return Err(Error::Config(
                "classifier.confidence_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if classifier.target_size.contains(&0) {
            return Err(Error::Config("classifier.target_size must be non-zero".to_string()));
        }

        if self.database.commit_max_attempts == 0 {
            return Err(Error::Config("database.commit_max_attempts must be > 0".to_string()));
        }
        if self.reconciler.misrecognized_dir_cap == 0 {
            return Err(Error::Config("reconciler.misrecognized_dir_cap must be > 0".to_string()));
        }
        if self.reconciler.auto_exit_minutes <= 0 {
            return Err(Error::Config("reconciler.auto_exit_minutes must be > 0".to_string()));
        }
        if self.vendor.requests_per_second == 0 || self.vendor.max_concurrent_lookups == 0 {
            return Err(Error::Config(
                "vendor.requests_per_second and vendor.max_concurrent_lookups must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the root folder (CLI → env → TOML → OS default)
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            return PathBuf::from(path);
        }
        if let Some(path) = &self.root_folder {
            return path.clone();
        }
        default_root_folder()
    }

    /// Database file resolved against the root folder
    pub fn database_path(&self, root: &Path) -> PathBuf {
        resolve_under(root, &self.database.path)
    }

    /// Evidence zone directories resolved against the root folder
    pub fn evidence_layout(&self, root: &Path) -> EvidenceLayout {
        EvidenceLayout {
            pending: resolve_under(root, &self.paths.pending),
            confirmed: resolve_under(root, &self.paths.confirmed),
            misrecognized: resolve_under(root, &self.paths.misrecognized),
            uncertain: resolve_under(root, &self.paths.uncertain),
            errors: resolve_under(root, &self.paths.errors),
            predictions_log: resolve_under(root, &self.paths.predictions_log),
        }
    }
}

fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("evpark").join("evpark.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/evpark/evpark.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("evpark"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/evpark"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("evpark"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/evpark"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("evpark"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\evpark"))
    } else {
        PathBuf::from("./evpark_data")
    }
}
