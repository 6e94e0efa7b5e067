//! Configuration for the report pipeline and the HTTP service.
//!
//! Values come from three layers, each overriding the previous one:
//! built-in defaults, an optional YAML file, and `LABFORGE_*` environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::figure::SandboxLimits;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML configuration file could not be parsed.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Modules plotting scripts may import by default.
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "numpy",
    "matplotlib",
    "scipy",
    "math",
    "statistics",
    "json",
    "collections",
    "itertools",
    "functools",
    "fractions",
    "decimal",
];

/// Isolation prefix for plotting scripts: a private network namespace.
pub fn default_sandbox_wrapper() -> Vec<String> {
    if cfg!(target_os = "linux") {
        ["unshare", "--net", "--map-root-user"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        Vec::new()
    }
}

/// Configuration for the report pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Service settings
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// Root directory for sessions and history.
    pub data_dir: PathBuf,
    /// Maximum size of a single uploaded file in bytes.
    pub max_upload_bytes: u64,
    /// How long an idle session is kept before it is swept.
    pub session_retention: Duration,
    /// Maximum number of reports kept in history.
    pub history_capacity: usize,

    // Extraction settings
    /// Guide text is truncated to this many characters.
    pub guide_text_limit: usize,
    /// Command used to extract text from PDFs.
    pub pdf_text_command: String,
    /// Command used to OCR scanned images.
    pub ocr_command: String,
    /// Timeout for a single text extraction command.
    pub extract_timeout: Duration,

    // Synthesis settings
    /// Timeout for one generation request.
    pub synthesis_timeout: Duration,
    /// Attempts per synthesis call when the transport fails.
    pub max_transport_attempts: u32,
    /// Base delay for exponential backoff between transport attempts.
    pub backoff_base: Duration,
    /// Maximum corrective re-syntheses after content-fixable compile errors.
    pub max_corrective_retries: u32,
    /// Token limit passed to the generation endpoint.
    pub max_tokens: u32,
    /// Sampling temperature for generation.
    pub temperature: f64,

    // Plotting settings
    /// Python interpreter for plotting scripts.
    pub python_path: String,
    /// Wall-clock limit for one plotting script.
    pub plot_timeout: Duration,
    /// Command prefix that isolates the plotting process.
    pub sandbox_wrapper: Vec<String>,
    /// Run plotting scripts even when `sandbox_wrapper` is empty.
    pub allow_unisolated_plotting: bool,
    /// Address-space limit for one plotting process, in bytes (0 = unset).
    pub plot_memory_limit: u64,
    /// CPU-time limit for one plotting process, in seconds (0 = unset).
    pub plot_cpu_seconds: u64,
    /// Largest file a plotting process may write, in bytes (0 = unset).
    pub plot_file_size_limit: u64,
    /// Maximum number of plotting scripts running at once.
    pub figure_concurrency: usize,
    /// Top-level modules plotting scripts may import.
    pub allowed_imports: Vec<String>,

    // Compiler settings
    /// Document compiler binary.
    pub compiler_path: String,
    /// Number of compiler passes.
    pub compiler_passes: u32,
    /// Timeout for one compiler pass.
    pub compile_timeout: Duration,
    /// Directory of `.ttf` fonts copied next to the source before compiling.
    pub fonts_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            data_dir: PathBuf::from("./labforge-data"),
            max_upload_bytes: 50 * 1024 * 1024,
            session_retention: Duration::from_secs(24 * 3600),
            history_capacity: 100,

            guide_text_limit: 32_768,
            pdf_text_command: "pdftotext".to_string(),
            ocr_command: "tesseract".to_string(),
            extract_timeout: Duration::from_secs(120),

            synthesis_timeout: Duration::from_secs(300),
            max_transport_attempts: 3,
            backoff_base: Duration::from_secs(2),
            max_corrective_retries: 2,
            max_tokens: 32_768,
            temperature: 0.3,

            python_path: "python3".to_string(),
            plot_timeout: Duration::from_secs(60),
            sandbox_wrapper: default_sandbox_wrapper(),
            allow_unisolated_plotting: false,
            plot_memory_limit: SandboxLimits::default().memory_limit,
            plot_cpu_seconds: SandboxLimits::default().cpu_seconds,
            plot_file_size_limit: SandboxLimits::default().file_size_limit,
            figure_concurrency: 4,
            allowed_imports: DEFAULT_ALLOWED_IMPORTS
                .iter()
                .map(|s| s.to_string())
                .collect(),

            compiler_path: "xelatex".to_string(),
            compiler_passes: 2,
            compile_timeout: Duration::from_secs(120),
            fonts_dir: None,
        }
    }
}

/// YAML overlay; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    bind_addr: Option<String>,
    data_dir: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
    session_retention_secs: Option<u64>,
    history_capacity: Option<usize>,
    guide_text_limit: Option<usize>,
    pdf_text_command: Option<String>,
    ocr_command: Option<String>,
    extract_timeout_secs: Option<u64>,
    synthesis_timeout_secs: Option<u64>,
    max_transport_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    max_corrective_retries: Option<u32>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    python_path: Option<String>,
    plot_timeout_secs: Option<u64>,
    sandbox_wrapper: Option<Vec<String>>,
    allow_unisolated_plotting: Option<bool>,
    plot_memory_limit: Option<u64>,
    plot_cpu_seconds: Option<u64>,
    plot_file_size_limit: Option<u64>,
    figure_concurrency: Option<usize>,
    allowed_imports: Option<Vec<String>>,
    compiler_path: Option<String>,
    compiler_passes: Option<u32>,
    compile_timeout_secs: Option<u64>,
    fonts_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: defaults, then the optional YAML file, then
    /// environment variables. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path)?;
            config.apply_file(serde_yaml::from_str(&text)?);
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LABFORGE_BIND_ADDR`: HTTP bind address (default: 127.0.0.1:5000)
    /// - `LABFORGE_DATA_DIR`: Session and history root (default: ./labforge-data)
    /// - `LABFORGE_MAX_UPLOAD_BYTES`: Per-file upload limit (default: 50 MiB)
    /// - `LABFORGE_SESSION_RETENTION_SECS`: Idle session lifetime (default: 86400)
    /// - `LABFORGE_HISTORY_CAPACITY`: Reports kept in history (default: 100)
    /// - `LABFORGE_GUIDE_TEXT_LIMIT`: Guide text character limit (default: 32768)
    /// - `LABFORGE_PDF_TEXT_COMMAND`: PDF text extractor (default: pdftotext)
    /// - `LABFORGE_OCR_COMMAND`: Image OCR command (default: tesseract)
    /// - `LABFORGE_SYNTHESIS_TIMEOUT_SECS`: Generation request timeout (default: 300)
    /// - `LABFORGE_MAX_TRANSPORT_ATTEMPTS`: Attempts per generation (default: 3)
    /// - `LABFORGE_BACKOFF_BASE_MS`: Backoff base in milliseconds (default: 2000)
    /// - `LABFORGE_MAX_CORRECTIVE_RETRIES`: Corrective re-syntheses (default: 2)
    /// - `LABFORGE_PYTHON`: Python interpreter (default: python3)
    /// - `LABFORGE_PLOT_TIMEOUT_SECS`: Plot script timeout (default: 60)
    /// - `LABFORGE_SANDBOX_WRAPPER`: Space-separated isolation prefix (default on Linux: `unshare --net --map-root-user`)
    /// - `LABFORGE_ALLOW_UNISOLATED_PLOTTING`: Run scripts with an empty wrapper (default: false)
    /// - `LABFORGE_PLOT_MEMORY_LIMIT`: Plot address-space limit in bytes (default: 2 GiB)
    /// - `LABFORGE_PLOT_CPU_SECONDS`: Plot CPU-time limit (default: 120)
    /// - `LABFORGE_PLOT_FILE_SIZE_LIMIT`: Plot output file size limit in bytes (default: 64 MiB)
    /// - `LABFORGE_FIGURE_CONCURRENCY`: Concurrent plot scripts (default: 4)
    /// - `LABFORGE_ALLOWED_IMPORTS`: Comma-separated import allow-list
    /// - `LABFORGE_COMPILER`: Document compiler (default: xelatex)
    /// - `LABFORGE_COMPILER_PASSES`: Compiler passes (default: 2)
    /// - `LABFORGE_COMPILE_TIMEOUT_SECS`: Compile timeout per pass (default: 120)
    /// - `LABFORGE_FONTS_DIR`: Fonts copied into each compile directory (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.max_upload_bytes {
            self.max_upload_bytes = v;
        }
        if let Some(v) = file.session_retention_secs {
            self.session_retention = Duration::from_secs(v);
        }
        if let Some(v) = file.history_capacity {
            self.history_capacity = v;
        }
        if let Some(v) = file.guide_text_limit {
            self.guide_text_limit = v;
        }
        if let Some(v) = file.pdf_text_command {
            self.pdf_text_command = v;
        }
        if let Some(v) = file.ocr_command {
            self.ocr_command = v;
        }
        if let Some(v) = file.extract_timeout_secs {
            self.extract_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.synthesis_timeout_secs {
            self.synthesis_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.max_transport_attempts {
            self.max_transport_attempts = v;
        }
        if let Some(v) = file.backoff_base_ms {
            self.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = file.max_corrective_retries {
            self.max_corrective_retries = v;
        }
        if let Some(v) = file.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.python_path {
            self.python_path = v;
        }
        if let Some(v) = file.plot_timeout_secs {
            self.plot_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.sandbox_wrapper {
            self.sandbox_wrapper = v;
        }
        if let Some(v) = file.allow_unisolated_plotting {
            self.allow_unisolated_plotting = v;
        }
        if let Some(v) = file.plot_memory_limit {
            self.plot_memory_limit = v;
        }
        if let Some(v) = file.plot_cpu_seconds {
            self.plot_cpu_seconds = v;
        }
        if let Some(v) = file.plot_file_size_limit {
            self.plot_file_size_limit = v;
        }
        if let Some(v) = file.figure_concurrency {
            self.figure_concurrency = v;
        }
        if let Some(v) = file.allowed_imports {
            self.allowed_imports = v;
        }
        if let Some(v) = file.compiler_path {
            self.compiler_path = v;
        }
        if let Some(v) = file.compiler_passes {
            self.compiler_passes = v;
        }
        if let Some(v) = file.compile_timeout_secs {
            self.compile_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.fonts_dir {
            self.fonts_dir = Some(v);
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Service settings
        if let Ok(val) = std::env::var("LABFORGE_BIND_ADDR") {
            self.bind_addr = val;
        }

        if let Ok(val) = std::env::var("LABFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("LABFORGE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_env_value(&val, "LABFORGE_MAX_UPLOAD_BYTES")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_SESSION_RETENTION_SECS") {
            let secs: u64 = parse_env_value(&val, "LABFORGE_SESSION_RETENTION_SECS")?;
            self.session_retention = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("LABFORGE_HISTORY_CAPACITY") {
            self.history_capacity = parse_env_value(&val, "LABFORGE_HISTORY_CAPACITY")?;
        }

        // Extraction settings
        if let Ok(val) = std::env::var("LABFORGE_GUIDE_TEXT_LIMIT") {
            self.guide_text_limit = parse_env_value(&val, "LABFORGE_GUIDE_TEXT_LIMIT")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_PDF_TEXT_COMMAND") {
            self.pdf_text_command = val;
        }

        if let Ok(val) = std::env::var("LABFORGE_OCR_COMMAND") {
            self.ocr_command = val;
        }

        // Synthesis settings
        if let Ok(val) = std::env::var("LABFORGE_SYNTHESIS_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "LABFORGE_SYNTHESIS_TIMEOUT_SECS")?;
            self.synthesis_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("LABFORGE_MAX_TRANSPORT_ATTEMPTS") {
            self.max_transport_attempts =
                parse_env_value(&val, "LABFORGE_MAX_TRANSPORT_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_BACKOFF_BASE_MS") {
            let ms: u64 = parse_env_value(&val, "LABFORGE_BACKOFF_BASE_MS")?;
            self.backoff_base = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("LABFORGE_MAX_CORRECTIVE_RETRIES") {
            self.max_corrective_retries =
                parse_env_value(&val, "LABFORGE_MAX_CORRECTIVE_RETRIES")?;
        }

        // Plotting settings
        if let Ok(val) = std::env::var("LABFORGE_PYTHON") {
            self.python_path = val;
        }

        if let Ok(val) = std::env::var("LABFORGE_PLOT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "LABFORGE_PLOT_TIMEOUT_SECS")?;
            self.plot_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("LABFORGE_SANDBOX_WRAPPER") {
            self.sandbox_wrapper = val.split_whitespace().map(|s| s.to_string()).collect();
        }

        if let Ok(val) = std::env::var("LABFORGE_ALLOW_UNISOLATED_PLOTTING") {
            self.allow_unisolated_plotting =
                parse_env_value(&val, "LABFORGE_ALLOW_UNISOLATED_PLOTTING")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_PLOT_MEMORY_LIMIT") {
            self.plot_memory_limit = parse_env_value(&val, "LABFORGE_PLOT_MEMORY_LIMIT")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_PLOT_CPU_SECONDS") {
            self.plot_cpu_seconds = parse_env_value(&val, "LABFORGE_PLOT_CPU_SECONDS")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_PLOT_FILE_SIZE_LIMIT") {
            self.plot_file_size_limit = parse_env_value(&val, "LABFORGE_PLOT_FILE_SIZE_LIMIT")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_FIGURE_CONCURRENCY") {
            self.figure_concurrency = parse_env_value(&val, "LABFORGE_FIGURE_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_ALLOWED_IMPORTS") {
            self.allowed_imports = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Compiler settings
        if let Ok(val) = std::env::var("LABFORGE_COMPILER") {
            self.compiler_path = val;
        }

        if let Ok(val) = std::env::var("LABFORGE_COMPILER_PASSES") {
            self.compiler_passes = parse_env_value(&val, "LABFORGE_COMPILER_PASSES")?;
        }

        if let Ok(val) = std::env::var("LABFORGE_COMPILE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "LABFORGE_COMPILE_TIMEOUT_SECS")?;
            self.compile_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("LABFORGE_FONTS_DIR") {
            self.fonts_dir = Some(PathBuf::from(val));
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "bind_addr '{}' is not a socket address",
                self.bind_addr
            )));
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        if self.history_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "history_capacity must be greater than 0".to_string(),
            ));
        }

        if self.guide_text_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "guide_text_limit must be greater than 0".to_string(),
            ));
        }

        if self.max_transport_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_transport_attempts must be at least 1".to_string(),
            ));
        }

        if self.synthesis_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "synthesis_timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.plot_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "plot_timeout must be greater than 0".to_string(),
            ));
        }

        if self.figure_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "figure_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.python_path.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "python_path cannot be empty".to_string(),
            ));
        }

        if self.compiler_path.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "compiler_path cannot be empty".to_string(),
            ));
        }

        if self.compiler_passes == 0 {
            return Err(ConfigError::ValidationFailed(
                "compiler_passes must be at least 1".to_string(),
            ));
        }

        if self.compile_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "compile_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resource limits applied to every plotting process.
    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit: self.plot_memory_limit,
            cpu_seconds: self.plot_cpu_seconds,
            file_size_limit: self.plot_file_size_limit,
            ..SandboxLimits::default()
        }
    }

    /// Directory holding per-session working directories.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Directory holding per-task workspaces (sources, figures, documents).
    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    /// Path of the history index file.
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    /// Builder method to set the data directory.
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Builder method to set the bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Builder method to set the synthesis timeout.
    pub fn with_synthesis_timeout(mut self, timeout: Duration) -> Self {
        self.synthesis_timeout = timeout;
        self
    }

    /// Builder method to set transport attempts and backoff base.
    pub fn with_transport_retries(mut self, attempts: u32, backoff_base: Duration) -> Self {
        self.max_transport_attempts = attempts;
        self.backoff_base = backoff_base;
        self
    }

    /// Builder method to set the corrective retry bound.
    pub fn with_max_corrective_retries(mut self, retries: u32) -> Self {
        self.max_corrective_retries = retries;
        self
    }

    /// Builder method to set figure concurrency.
    pub fn with_figure_concurrency(mut self, concurrency: usize) -> Self {
        self.figure_concurrency = concurrency;
        self
    }

    /// Builder method to set the plot timeout.
    pub fn with_plot_timeout(mut self, timeout: Duration) -> Self {
        self.plot_timeout = timeout;
        self
    }

    /// Builder method to set the history capacity.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Builder method to set the compiler binary.
    pub fn with_compiler_path(mut self, path: impl Into<String>) -> Self {
        self.compiler_path = path.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
