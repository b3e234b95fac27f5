//! Configuration loading and root folder resolution
//!
//! Two layers:
//! 1. **TOML bootstrap** (`TomlConfig`): optional file, every key optional
//! 2. **Resolved configuration** (`AppConfig`): absolute paths and settings,
//!    passed explicitly into every component constructor
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FORMFLOW_ROOT_FOLDER` environment variable
//! 3. `root_folder` key in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FORMFLOW_ROOT_FOLDER";

const DEFAULT_PORT: u16 = 5740;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for catalog, downloads, cases and output
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Catalog source file (relative paths resolve against the root folder)
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Download destination directory
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,

    /// Case tree base directory
    #[serde(default)]
    pub cases_dir: Option<PathBuf>,

    /// Default directory for filled documents and templates
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// HTTP server port for the event stream
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-subscriber event buffer size
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Timeout for form downloads, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// User-Agent header sent with downloads
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Fill strategies, in the order they are attempted (primary first)
    #[serde(default)]
    pub codecs: Vec<CodecConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            catalog_path: None,
            downloads_dir: None,
            cases_dir: None,
            output_dir: None,
            port: DEFAULT_PORT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: None,
            logging: LoggingConfig::default(),
            codecs: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How an external codec receives the field values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldsFormat {
    /// Flat JSON object `{ "name": "value" }`
    #[default]
    Json,
    /// XFDF document (accepted by most form-filling tools)
    Xfdf,
}

/// One externally provided fill strategy
///
/// Argument lists may contain the placeholders `{input}`, `{output}` and
/// `{fields}`; they are substituted per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Strategy name used in logs and events
    pub name: String,
    /// Executable to run
    pub program: String,
    /// Arguments printing one field name per line on stdout
    pub list_fields: Vec<String>,
    /// Arguments writing a filled copy of `{input}` to `{output}`
    pub fill: Vec<String>,
    /// Arguments writing a flattened copy of `{input}` to `{output}`
    #[serde(default)]
    pub flatten: Option<Vec<String>>,
    /// Encoding of the `{fields}` file
    #[serde(default)]
    pub fields_format: FieldsFormat,
    /// Only stdout lines starting with this prefix name a field (prefix stripped)
    #[serde(default)]
    pub field_prefix: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default configuration file path for the platform
///
/// `~/.config/formflow/config.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("formflow").join("config.toml"))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("formflow"))
        .unwrap_or_else(|| PathBuf::from("./formflow_data"))
}

/// Load the TOML bootstrap file
///
/// An explicitly requested file must exist. When no path is given the
/// platform default is tried; if it is missing, defaults are used with a
/// warning rather than failing startup.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                warn!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve the root folder following the priority order in the module docs
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Fully resolved configuration
///
/// Built once at startup and handed to each component; there is no global
/// active configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub root_folder: PathBuf,
    pub catalog_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub cases_dir: PathBuf,
    pub output_dir: PathBuf,
    pub port: u16,
    pub event_capacity: usize,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub log_level: String,
    pub codecs: Vec<CodecConfig>,
}

impl AppConfig {
    /// Load the TOML file (if any) and resolve every path
    pub fn load(config_file: Option<&Path>, root_folder_arg: Option<&Path>) -> Result<Self> {
        let toml_config = load_toml_config(config_file)?;
        let root_folder = resolve_root_folder(root_folder_arg, &toml_config);
        Self::from_toml(toml_config, root_folder)
    }

    /// Resolve a parsed TOML config against a root folder
    pub fn from_toml(toml_config: TomlConfig, root_folder: PathBuf) -> Result<Self> {
        if toml_config.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for codec in &toml_config.codecs {
            if !seen.insert(codec.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate codec name: {}",
                    codec.name
                )));
            }
            if codec.program.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Codec '{}' has no program",
                    codec.name
                )));
            }
        }

        let under_root = |configured: &Option<PathBuf>, default: &str| -> PathBuf {
            match configured {
                Some(path) if path.is_absolute() => path.clone(),
                Some(path) => root_folder.join(path),
                None => root_folder.join(default),
            }
        };

        Ok(Self {
            catalog_path: under_root(&toml_config.catalog_path, "catalog.csv"),
            downloads_dir: under_root(&toml_config.downloads_dir, "downloads"),
            cases_dir: under_root(&toml_config.cases_dir, "cases"),
            output_dir: under_root(&toml_config.output_dir, "output"),
            port: toml_config.port,
            event_capacity: toml_config.event_capacity,
            http_timeout: Duration::from_secs(toml_config.http_timeout_secs),
            user_agent: toml_config
                .user_agent
                .unwrap_or_else(|| format!("formflow/{}", env!("CARGO_PKG_VERSION"))),
            log_level: toml_config.logging.level,
            codecs: toml_config.codecs,
            root_folder,
        })
    }

    /// Create the root folder and working directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.root_folder,
            &self.downloads_dir,
            &self.cases_dir,
            &self.output_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
