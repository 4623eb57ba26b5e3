// LogTrawl - platform/config.rs
//
// Configuration directory resolution and config.toml loading with
// validation against named constants. Invalid values never abort a run:
// they produce warnings and fall back to defaults.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Resolved platform paths for LogTrawl configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logtrawl/ or %APPDATA%\LogTrawl\config\)
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        match ProjectDirs::from("", "", constants::APP_ID) {
            Some(proj_dirs) => {
                let config_dir = proj_dirs.config_dir().to_path_buf();
                tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
                Self { config_dir }
            }
            None => {
                tracing::warn!("Could not determine platform directories, using current directory");
                Self {
                    config_dir: PathBuf::from("."),
                }
            }
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml. Unknown keys are ignored.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub discovery: DiscoverySection,
    pub search: SearchSection,
    pub patterns: PatternsSection,
    pub logging: LoggingSection,
}

/// `[discovery]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Regex anchored at the start of pseudo-paths.
    pub path_filter: Option<String>,
    /// `;`-separated archive suffixes.
    pub archive_extensions: Option<String>,
    /// Maximum archive nesting depth.
    pub max_archive_depth: Option<usize>,
}

/// `[search]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub chronological: Option<bool>,
    pub hide_timestamp: Option<bool>,
    pub verbosity: Option<u8>,
    /// Hold events back until the next timestamp line.
    pub wait_for_boundary: Option<bool>,
}

/// `[patterns]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    /// Pattern documents loaded before those given on the command line.
    pub files: Option<Vec<String>>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Discovery --
    pub path_filter: String,
    pub archive_extensions: String,
    pub max_archive_depth: usize,

    // -- Search --
    pub chronological: bool,
    pub hide_timestamp: bool,
    pub verbosity: u8,
    pub wait_for_boundary: bool,

    // -- Patterns --
    pub pattern_files: Vec<PathBuf>,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path_filter: constants::DEFAULT_PATH_FILTER.to_string(),
            archive_extensions: constants::DEFAULT_ARCHIVE_EXTENSIONS.to_string(),
            max_archive_depth: constants::DEFAULT_MAX_ARCHIVE_DEPTH,
            chronological: false,
            hide_timestamp: false,
            verbosity: 0,
            wait_for_boundary: true,
            pattern_files: Vec::new(),
            log_level: None,
        }
    }
}

/// Load and validate `config.toml` from the given config directory.
///
/// Returns `AppConfig` with validated values and a list of non-fatal
/// warnings. A missing file yields defaults with no warnings; an unreadable
/// or unparseable one yields defaults and a warning.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<String>) {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    match load_config_file(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}

/// Load and validate an explicitly named config file. Read and parse
/// failures are errors; invalid values are still only warnings.
pub fn load_config_file(path: &Path) -> Result<(AppConfig, Vec<String>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "Loaded config.toml");
    Ok(validate(raw))
}

/// Check every value against its domain, accumulating warnings.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let mut config = AppConfig::default();

    // -- Discovery: path_filter --
    if let Some(filter) = raw.discovery.path_filter {
        match regex::Regex::new(&filter) {
            Ok(_) => config.path_filter = filter,
            Err(e) => warnings.push(format!(
                "[discovery] path_filter = \"{filter}\" is not a valid regex ({e}). Using default ({}).",
                constants::DEFAULT_PATH_FILTER,
            )),
        }
    }

    // -- Discovery: archive_extensions --
    if let Some(extensions) = raw.discovery.archive_extensions {
        config.archive_extensions = extensions;
    }

    // -- Discovery: max_archive_depth --
    if let Some(depth) = raw.discovery.max_archive_depth {
        if (1..=constants::ABSOLUTE_MAX_ARCHIVE_DEPTH).contains(&depth) {
            config.max_archive_depth = depth;
        } else {
            warnings.push(format!(
                "[discovery] max_archive_depth = {depth} is out of range (1-{}). Using default ({}).",
                constants::ABSOLUTE_MAX_ARCHIVE_DEPTH,
                constants::DEFAULT_MAX_ARCHIVE_DEPTH,
            ));
        }
    }

    // -- Search --
    if let Some(v) = raw.search.chronological {
        config.chronological = v;
    }
    if let Some(v) = raw.search.hide_timestamp {
        config.hide_timestamp = v;
    }
    if let Some(v) = raw.search.wait_for_boundary {
        config.wait_for_boundary = v;
    }
    if let Some(verbosity) = raw.search.verbosity {
        if verbosity <= constants::MAX_VERBOSITY {
            config.verbosity = verbosity;
        } else {
            warnings.push(format!(
                "[search] verbosity = {verbosity} is out of range (0-{}). Using default (0).",
                constants::MAX_VERBOSITY,
            ));
        }
    }

    // -- Patterns: files --
    if let Some(files) = raw.patterns.files {
        config.pattern_files = files
            .into_iter()
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from)
            .collect();
    }

    // -- Logging: level --
    if let Some(level) = raw.logging.level {
        if constants::LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level);
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. Valid values: {}. Using default ({}).",
                constants::LOG_LEVELS.join(", "),
                constants::DEFAULT_LOG_LEVEL,
            ));
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }

    (config, warnings)
}
