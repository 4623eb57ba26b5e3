// LogTrawl - main.rs
//
// Command-line entry point:
// 1. CLI argument parsing
// 2. config.toml loading (platform directory or --config)
// 3. Logging initialisation
// 4. Command dispatch: overview, search, show-event-types, save-event-type

use clap::{ArgAction, Args, Parser, Subcommand};
use logtrawl::app::pattern_mgr;
use logtrawl::app::session::{LineWriter, SearchOptions, SearchSession};
use logtrawl::core::discovery::{self, DiscoveryConfig};
use logtrawl::core::hooks::HookLibrary;
use logtrawl::core::pattern::{EventTypeDefinition, EventTypeRegistry};
use logtrawl::platform::config::{self, AppConfig, PlatformPaths};
use logtrawl::util::constants;
use logtrawl::util::error::LogTrawlError;
use logtrawl::util::logging;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// LogTrawl - log bundle discovery and event correlation.
///
/// Walks directories and nested zip/tar archives, matches log lines against
/// event type patterns, correlates events across files and exports them.
#[derive(Parser, Debug)]
#[command(name = "logtrawl", version, about)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    /// Configuration file (defaults to config.toml in the platform config directory).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the log sources found under the given paths.
    Overview {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },

    /// Search log files for events.
    Search(SearchArgs),

    /// Print every loaded event type definition.
    ShowEventTypes {
        #[command(flatten)]
        patterns: PatternArgs,
        #[command(flatten)]
        event_type: EventTypeArgs,
    },

    /// Insert or replace the event type given on the command line in a
    /// pattern document.
    SaveEventType {
        /// Pattern document to update (created when missing).
        #[arg(short = 'p', long = "pattern-file")]
        pattern_file: PathBuf,
        #[command(flatten)]
        event_type: EventTypeArgs,
    },
}

#[derive(Args, Debug, Default)]
struct DiscoveryArgs {
    /// Regex anchored at the start of each pseudo-path selecting log files.
    #[arg(short = 'f', long = "path-filter")]
    path_filter: Option<String>,

    /// `;`-separated archive suffixes to probe (empty disables probing).
    #[arg(short = 'e', long = "archive-ext")]
    archive_extensions: Option<String>,
}

#[derive(Args, Debug, Default)]
struct PatternArgs {
    /// Pattern document to load (repeatable; later documents override).
    #[arg(short = 'x', long = "patterns")]
    patterns: Vec<PathBuf>,
}

/// Options defining one event type on the command line. Only used when
/// `--rex-text` is given.
#[derive(Args, Debug, Default)]
struct EventTypeArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long = "rex-filename")]
    rex_filename: Option<String>,
    #[arg(long = "rex-text")]
    rex_text: Option<String>,
    #[arg(long = "rex-timestamp")]
    rex_timestamp: Option<String>,
    /// Number of lines the text regex spans.
    #[arg(long = "multiline")]
    multiline: Option<usize>,
    #[arg(long = "case-sensitive")]
    case_sensitive: bool,
    /// Display template (defaults to raw text and location).
    #[arg(long)]
    display: Option<String>,
    #[arg(long = "display-if-changed")]
    display_if_changed: bool,
    #[arg(long)]
    immediate: bool,
    #[arg(long = "exec-on-init")]
    exec_on_init: Option<String>,
    #[arg(long = "exec-on-file")]
    exec_on_file: Option<String>,
    #[arg(long = "exec-on-match")]
    exec_on_match: Option<String>,
    #[arg(long = "exec-on-wrapup")]
    exec_on_wrapup: Option<String>,
}

impl EventTypeArgs {
    fn to_definition(&self) -> Option<EventTypeDefinition> {
        let rex_text = self.rex_text.clone()?;
        let flag = |on: bool| on.then(|| "true".to_string());
        Some(EventTypeDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            rex_filename: self.rex_filename.clone(),
            rex_text: Some(rex_text),
            rex_timestamp: self.rex_timestamp.clone(),
            multiline_count: self.multiline.map(|n| n.to_string()),
            case_sensitive: flag(self.case_sensitive),
            display_on_match: Some(
                self.display
                    .clone()
                    .unwrap_or_else(|| constants::DEFAULT_DISPLAY_TEMPLATE.to_string()),
            ),
            display_if_changed: flag(self.display_if_changed),
            immediate: flag(self.immediate),
            exec_on_init: self.exec_on_init.clone(),
            exec_on_file: self.exec_on_file.clone(),
            exec_on_match: self.exec_on_match.clone(),
            exec_on_wrapup: self.exec_on_wrapup.clone(),
        })
    }
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    #[command(flatten)]
    discovery: DiscoveryArgs,

    #[command(flatten)]
    patterns: PatternArgs,

    #[command(flatten)]
    event_type: EventTypeArgs,

    /// Sort events by timestamp before running hooks and displaying.
    #[arg(short = 'c', long = "chronological")]
    chronological: bool,

    /// Print display strings without the leading timestamp.
    #[arg(short = 't', long = "hide-timestamp")]
    hide_timestamp: bool,

    /// Export matched events to this directory.
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Search all paths as one source so events correlate across them.
    #[arg(short = 'g', long = "global")]
    global: bool,

    /// Finalize events at match time instead of at the next timestamp line.
    #[arg(long = "no-wait")]
    no_wait: bool,
}

fn main() {
    let cli = Cli::parse();

    let (app_config, config_warnings) = match &cli.config {
        Some(path) => match config::load_config_file(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => config::load_config(&PlatformPaths::resolve().config_dir),
    };

    logging::init(cli.debug, app_config.log_level.as_deref(), cli.verbose);
    for warning in &config_warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "LogTrawl starting"
    );

    if let Err(e) = run(cli, &app_config) {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, app_config: &AppConfig) -> Result<(), LogTrawlError> {
    let verbosity = cli.verbose.max(app_config.verbosity);
    match cli.command {
        Command::Overview { paths, discovery } => {
            let config = discovery_config(app_config, &discovery, None);
            overview(&paths, &config, verbosity)
        }
        Command::Search(args) => search(args, app_config, verbosity),
        Command::ShowEventTypes {
            patterns,
            event_type,
        } => {
            let registry = load_registry(app_config, &patterns, &event_type)?;
            let mut out = std::io::stdout().lock();
            for event_type in registry.iter() {
                // Broken pipes end the listing quietly.
                if writeln!(out, "{event_type}").is_err() {
                    break;
                }
            }
            Ok(())
        }
        Command::SaveEventType {
            pattern_file,
            event_type,
        } => {
            let def = event_type
                .to_definition()
                .ok_or(LogTrawlError::NoEventTypes)?;
            pattern_mgr::save_event_type(&pattern_file, &def, &HookLibrary::default())?;
            println!(
                "Event type {} saved in {}",
                def.effective_name(),
                pattern_file.display()
            );
            Ok(())
        }
    }
}

fn discovery_config(
    app_config: &AppConfig,
    args: &DiscoveryArgs,
    cancel_flag: Option<Arc<AtomicBool>>,
) -> DiscoveryConfig {
    DiscoveryConfig {
        path_filter: args
            .path_filter
            .clone()
            .unwrap_or_else(|| app_config.path_filter.clone()),
        archive_extensions: args
            .archive_extensions
            .clone()
            .unwrap_or_else(|| app_config.archive_extensions.clone()),
        max_archive_depth: app_config.max_archive_depth,
        cancel_flag,
    }
}

/// Pattern documents from the config first, then those on the command line,
/// then the command-line event type.
fn load_registry(
    app_config: &AppConfig,
    patterns: &PatternArgs,
    event_type: &EventTypeArgs,
) -> Result<EventTypeRegistry, LogTrawlError> {
    let library = HookLibrary::default();
    let files: Vec<PathBuf> = app_config
        .pattern_files
        .iter()
        .chain(&patterns.patterns)
        .cloned()
        .collect();
    let mut registry = pattern_mgr::load_pattern_files(&files, &library)?;
    if let Some(def) = event_type.to_definition() {
        pattern_mgr::add_definition(&mut registry, &def, &library)?;
    }
    if registry.is_empty() {
        return Err(LogTrawlError::NoEventTypes);
    }
    Ok(registry)
}

fn overview(paths: &[PathBuf], config: &DiscoveryConfig, verbosity: u8) -> Result<(), LogTrawlError> {
    let (sources, warnings) = discovery::discover(paths, config)?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    for source in &sources {
        println!("{source}");
        if verbosity >= 2 {
            for file in &source.files {
                println!("    {}", file.pseudo_path);
            }
        }
    }
    Ok(())
}

fn search(args: SearchArgs, app_config: &AppConfig, verbosity: u8) -> Result<(), LogTrawlError> {
    let registry = load_registry(app_config, &args.patterns, &args.event_type)?;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_flag);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let scan_config = discovery_config(app_config, &args.discovery, Some(Arc::clone(&cancel_flag)));
    let options = SearchOptions {
        chronological: args.chronological || app_config.chronological,
        hide_timestamp: args.hide_timestamp || app_config.hide_timestamp,
        verbosity,
        output_dir: args.output_dir.clone(),
        wait_for_boundary: app_config.wait_for_boundary && !args.no_wait,
        cancel_flag: Some(Arc::clone(&cancel_flag)),
    };

    let root_groups: Vec<Vec<PathBuf>> = if args.global {
        vec![args.paths.clone()]
    } else {
        args.paths.iter().map(|p| vec![p.clone()]).collect()
    };

    // A failed write sets the cancel flag; the run then ends quietly.
    let mut writer = LineWriter::new(std::io::stdout().lock(), cancel_flag);

    for roots in root_groups {
        let (sources, warnings) = discovery::discover(&roots, &scan_config)?;
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        let mut session = SearchSession::new(registry.clone(), options.clone())?;
        let result = session
            .search_sources(&sources, &mut |line: &str| writer.write_line(line))
            .and_then(|()| session.wrapup(&mut |line: &str| writer.write_line(line)));
        if writer.failed() {
            return Ok(());
        }
        result?;

        let stats = session.stats();
        tracing::info!(
            files = stats.files_scanned,
            events = stats.events_found,
            displayed = stats.events_displayed,
            exported = stats.events_exported,
            "Finished {}",
            roots
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(";")
        );
    }
    Ok(())
}
