// LogTrawl - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogTrawl";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogTrawl";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the configuration file inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

// =============================================================================
// Discovery
// =============================================================================

/// Default path filter, applied case-insensitively and anchored at the start
/// of the forward-slash-normalised pseudo-path.
pub const DEFAULT_PATH_FILTER: &str = r".*\.log.*";

/// Default archive extensions, `;`-separated. Matched case-insensitively
/// against the end of a file name.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &str = ".zip;.tar;.tar.gz;.tgz";

/// Default maximum nesting depth of archives inside archives.
pub const DEFAULT_MAX_ARCHIVE_DEPTH: usize = 16;

/// Hard upper bound on archive nesting depth (prevents runaway recursion
/// through self-similar or malicious bundles).
pub const ABSOLUTE_MAX_ARCHIVE_DEPTH: usize = 64;

/// Size of a tar header block in bytes.
pub const TAR_BLOCK_SIZE: usize = 512;

/// Leading bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// =============================================================================
// Event type defaults
// =============================================================================

/// Name given to an event type defined without one on the command line.
pub const DEFAULT_EVENT_TYPE_NAME: &str = "DEFAULT_EVENT_TYPE";

/// Description used when a definition provides none.
pub const DEFAULT_DESCRIPTION: &str = "N/A";

/// Filename pattern used when a definition provides none.
pub const DEFAULT_REX_FILENAME: &str = ".*";

/// Text pattern used when a definition provides none.
pub const DEFAULT_REX_TEXT: &str = ".*";

/// Timestamp pattern used when a definition provides none:
/// `YYYY-MM-DD hh:mm:ss` at the start of a line.
pub const DEFAULT_REX_TIMESTAMP: &str =
    r"^(?P<_Y>\d{4})-(?P<_M>\d\d)-(?P<_D>\d\d) (?P<_h>\d\d):(?P<_m>\d\d):(?P<_s>\d\d)";

/// Display template applied to command-line event types when `--display`
/// is not given explicitly.
pub const DEFAULT_DISPLAY_TEMPLATE: &str = "{_raw} at {_source_path}:{_line_number}";

/// Maximum length of any regex in an event type definition.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4096;

/// Maximum pattern document size in bytes.
pub const MAX_PATTERN_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Largest accepted multiline window. The window can never exceed the
/// backlog because matching only looks at buffered lines.
pub const MAX_MULTILINE_COUNT: usize = BACKLOG_CAPACITY;

// =============================================================================
// Scanning
// =============================================================================

/// Number of most recent raw lines kept per file for multiline matching
/// and timestamp lookback.
pub const BACKLOG_CAPACITY: usize = 100;

/// Progress statistics are considered every this many lines.
pub const PROGRESS_CHECK_LINES: u64 = 10_000;

/// Minimum interval between two progress reports.
pub const PROGRESS_INTERVAL_SECS: u64 = 30;

/// Years below this are treated as two-digit years and offset by 2000.
pub const TWO_DIGIT_YEAR_LIMIT: i32 = 100;

/// Offset added to two-digit years.
pub const TWO_DIGIT_YEAR_BASE: i32 = 2000;

/// Minimum number of date/time components a timestamp match must provide.
pub const MIN_TIMESTAMP_COMPONENTS: usize = 4;

/// Format of the `_timestamp` system field.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format of the `_date` system field.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format of the `_time` system field.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Format used for discovery timestamps in overviews.
pub const OVERVIEW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Templating diagnostics
// =============================================================================

/// Rendered in place of a `None` value.
pub const NOT_AVAILABLE: &str = "N/A";

/// Rendered when a `{field@type}` lookup finds nothing.
pub const NO_MATCHING_EVENT: &str = "NO MATCHING EVENT";

// =============================================================================
// Export
// =============================================================================

/// Root element of exported XML documents.
pub const EXPORT_XML_ROOT: &str = "LogTrawlEvents";

/// Element wrapping one exported event.
pub const EXPORT_XML_EVENT: &str = "Event";

/// CSV field delimiter.
pub const CSV_DELIMITER: u8 = b';';

// =============================================================================
// Logging
// =============================================================================

/// Default log level when neither RUST_LOG, --debug, nor config set one.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Valid `[logging] level` values.
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Highest meaningful `-v` count.
pub const MAX_VERBOSITY: u8 = 3;
