// LogTrawl - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Load-time errors name the event type and the offending field; hook faults
// travel on their own variant so callers can tell them apart from engine
// faults.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogTrawl operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogTrawlError {
    /// Pattern document loading or event type compilation failed.
    Pattern(PatternError),

    /// Discovery configuration was invalid.
    Discovery(DiscoveryError),

    /// A hook raised a fault while running.
    Hook {
        event_type: String,
        phase: &'static str,
        source: HookError,
    },

    /// Export operation failed.
    Export(ExportError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// A search or listing was requested without any event type.
    NoEventTypes,

    /// The run was cancelled through its cancel flag.
    Cancelled,
}

impl fmt::Display for LogTrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(e) => write!(f, "Pattern error: {e}"),
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Hook {
                event_type,
                phase,
                source,
            } => write!(f, "Hook {phase} of event type '{event_type}' failed: {source}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::NoEventTypes => write!(f, "No event type definition"),
            Self::Cancelled => write!(f, "Run cancelled"),
        }
    }
}

impl std::error::Error for LogTrawlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pattern(e) => Some(e),
            Self::Discovery(e) => Some(e),
            Self::Hook { source, .. } => Some(source),
            Self::Export(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::NoEventTypes | Self::Cancelled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern errors
// ---------------------------------------------------------------------------

/// Errors raised while loading pattern documents and compiling event types.
/// All of them are fatal at load time.
#[derive(Debug)]
pub enum PatternError {
    /// The document is not valid pattern XML.
    XmlParse {
        path: PathBuf,
        source: quick_xml::DeError,
    },

    /// The document could not be scanned for in-place update.
    XmlScan {
        path: PathBuf,
        source: quick_xml::Error,
    },

    /// Pattern document exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// A mandatory element is missing from a definition.
    MissingField {
        event_type: String,
        field: &'static str,
    },

    /// A regex in the definition does not compile.
    InvalidRegex {
        event_type: String,
        field: &'static str,
        pattern: String,
        source: regex::Error,
    },

    /// A regex exceeds the maximum allowed length.
    RegexTooLong {
        event_type: String,
        field: &'static str,
        length: usize,
        max_length: usize,
    },

    /// A scalar element holds a value outside its domain.
    InvalidValue {
        event_type: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A hook body does not compile against the hook library.
    InvalidHook {
        event_type: String,
        field: &'static str,
        source: HookError,
    },

    /// I/O error reading or writing a pattern document.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::XmlParse { path, source } => {
                write!(f, "Failed to parse pattern XML '{}': {source}", path.display())
            }
            Self::XmlScan { path, source } => {
                write!(f, "Failed to scan pattern XML '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Pattern document '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::MissingField { event_type, field } => {
                write!(f, "Event type '{event_type}': missing required field '{field}'")
            }
            Self::InvalidRegex {
                event_type,
                field,
                pattern,
                source,
            } => write!(
                f,
                "Event type '{event_type}': invalid regex in '{field}' ('{pattern}'): {source}"
            ),
            Self::RegexTooLong {
                event_type,
                field,
                length,
                max_length,
            } => write!(
                f,
                "Event type '{event_type}': regex in '{field}' is {length} chars, \
                 exceeds maximum of {max_length}"
            ),
            Self::InvalidValue {
                event_type,
                field,
                value,
                reason,
            } => write!(
                f,
                "Event type '{event_type}': invalid value '{value}' in '{field}': {reason}"
            ),
            Self::InvalidHook {
                event_type,
                field,
                source,
            } => write!(f, "Event type '{event_type}': invalid hook in '{field}': {source}"),
            Self::Io { path, source } => {
                write!(
                    f,
                    "I/O error on pattern document '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::XmlParse { source, .. } => Some(source),
            Self::XmlScan { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::InvalidHook { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PatternError> for LogTrawlError {
    fn from(e: PatternError) -> Self {
        Self::Pattern(e)
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to discovery configuration. Failures while walking are
/// never errors: they are collected as warnings.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The path filter regex does not compile.
    InvalidPathFilter {
        pattern: String,
        source: regex::Error,
    },

    /// The archive extension list produced an invalid regex.
    InvalidArchiveExtensions {
        extensions: String,
        source: regex::Error,
    },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPathFilter { pattern, source } => {
                write!(f, "Invalid path filter '{pattern}': {source}")
            }
            Self::InvalidArchiveExtensions { extensions, source } => {
                write!(f, "Invalid archive extensions '{extensions}': {source}")
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPathFilter { source, .. } => Some(source),
            Self::InvalidArchiveExtensions { source, .. } => Some(source),
        }
    }
}

impl From<DiscoveryError> for LogTrawlError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Timestamp errors
// ---------------------------------------------------------------------------

/// Reasons a line did not yield a timestamp. Recoverable: the scanner moves
/// on to the next older line and reports these at debug level only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// The timestamp regex did not match the line.
    NoMatch,

    /// Fewer than the required number of date/time components were captured.
    TooFewComponents { found: usize, required: usize },

    /// A mandatory component (month, day, hour, minute) was not captured.
    MissingComponent { component: char },

    /// A numeric component did not parse.
    InvalidNumber { component: char, value: String },

    /// A textual month did not match any English month abbreviation.
    UnknownMonth { value: String },

    /// The components do not form a valid calendar date/time.
    InvalidDate {
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    },
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => write!(f, "timestamp pattern did not match"),
            Self::TooFewComponents { found, required } => write!(
                f,
                "timestamp needs at least {required} components, found {found}"
            ),
            Self::MissingComponent { component } => {
                write!(f, "timestamp component '_{component}' is missing")
            }
            Self::InvalidNumber { component, value } => {
                write!(f, "timestamp component '_{component}' = '{value}' is not a number")
            }
            Self::UnknownMonth { value } => write!(f, "unknown month '{value}'"),
            Self::InvalidDate {
                year,
                month,
                day,
                hour,
                minute,
                second,
            } => write!(
                f,
                "invalid date/time {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ),
        }
    }
}

impl std::error::Error for TimestampError {}

// ---------------------------------------------------------------------------
// Field errors
// ---------------------------------------------------------------------------

/// Errors raised by event field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// System and virtual field names are read-only.
    ReadOnly { name: String },

    /// `add_field` was asked to create a field that already exists.
    AlreadyExists { name: String },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly { name } => write!(f, "field '{name}' is read-only"),
            Self::AlreadyExists { name } => write!(f, "field '{name}' already exists"),
        }
    }
}

impl std::error::Error for FieldError {}

// ---------------------------------------------------------------------------
// Hook errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling or running a hook body.
#[derive(Debug)]
pub enum HookError {
    /// A hook line names a function the library does not provide.
    UnknownFunction { name: String, line: usize },

    /// A hook function rejected its argument text.
    InvalidArgument {
        function: String,
        line: usize,
        reason: String,
    },

    /// The function needs a current event but the phase has none, or the
    /// event has been deleted.
    NoCurrentEvent { function: String },

    /// A field mutation was refused.
    Field(FieldError),

    /// Writing hook output failed.
    Io { function: String, source: io::Error },

    /// A custom hook function failed.
    Failed { function: String, reason: String },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction { name, line } => {
                write!(f, "line {line}: unknown hook function '{name}'")
            }
            Self::InvalidArgument {
                function,
                line,
                reason,
            } => write!(f, "line {line}: invalid argument to '{function}': {reason}"),
            Self::NoCurrentEvent { function } => {
                write!(f, "'{function}' requires a current event")
            }
            Self::Field(e) => write!(f, "{e}"),
            Self::Io { function, source } => write!(f, "'{function}' output failed: {source}"),
            Self::Failed { function, reason } => write!(f, "'{function}' failed: {reason}"),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Field(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FieldError> for HookError {
    fn from(e: FieldError) -> Self {
        Self::Field(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to export operations.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing the export file.
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    Csv { path: PathBuf, source: csv::Error },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Export I/O error '{}': {source}", path.display())
            }
            Self::Csv { path, source } => {
                write!(f, "CSV export error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
        }
    }
}

impl From<ExportError> for LogTrawlError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for LogTrawlError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogTrawl results.
pub type Result<T> = std::result::Result<T, LogTrawlError>;
