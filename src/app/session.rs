// LogTrawl - app/session.rs
//
// One search run: owns the event type registry and the event store, feeds
// every discovered file through the match state machine, invokes hooks,
// prints display lines and exports results at wrap-up.
//
// Hook order per run:
//   Init    once per event type, when the session is created
//   File    once per event type whose filename regex accepts a file
//   Match   per event: at insertion when immediate or not chronological,
//           otherwise after the chronological sort
//   Wrapup  once per event type at the end

use crate::core::export;
use crate::core::hooks::{HookContext, HookPhase, RunVariables};
use crate::core::model::{DiscoveredFile, Event, EventId, LogSource};
use crate::core::pattern::{EventType, EventTypeRegistry};
use crate::core::scanner::{FileScan, ScanInput};
use crate::core::store::EventStore;
use crate::platform::fs::lossy_lines;
use crate::util::constants;
use crate::util::error::LogTrawlError;
use chrono::NaiveDateTime;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options of one search run.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Sort events by timestamp before Match hooks and display.
    pub chronological: bool,
    /// Print display strings without the leading timestamp.
    pub hide_timestamp: bool,
    pub verbosity: u8,
    /// Export directory; nothing is exported when `None`.
    pub output_dir: Option<PathBuf>,
    /// Hold events back until the next timestamp line.
    pub wait_for_boundary: bool,
    /// Checked between lines; the run stops with `Cancelled` once set.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            chronological: false,
            hide_timestamp: false,
            verbosity: 0,
            output_dir: None,
            wait_for_boundary: true,
            cancel_flag: None,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub lines_read: u64,
    pub events_found: u64,
    pub events_displayed: u64,
    pub events_exported: usize,
}

/// Writes display lines to an output stream. The first write failure, such
/// as a closed pipe, sets the cancel flag so the run stops at the next line;
/// later lines are dropped.
pub struct LineWriter<W> {
    out: W,
    cancel_flag: Arc<AtomicBool>,
    error: Option<io::Error>,
}

impl<W: Write> LineWriter<W> {
    pub fn new(out: W, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            out,
            cancel_flag,
            error: None,
        }
    }

    pub fn write_line(&mut self, line: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{line}") {
            tracing::debug!(error = %e, "Display output closed, stopping run");
            self.cancel_flag.store(true, Ordering::Relaxed);
            self.error = Some(e);
        }
    }

    /// True once a write has failed.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Run a hook of `event_type`, if it has one, wrapping faults with the event
/// type and phase.
pub fn invoke_hook(
    store: &mut EventStore,
    registry: &EventTypeRegistry,
    vars: &RunVariables,
    event_type: &EventType,
    phase: HookPhase,
    current: Option<EventId>,
) -> Result<(), LogTrawlError> {
    let Some(hook) = event_type.hooks.get(phase) else {
        return Ok(());
    };
    let mut ctx = HookContext::new(store, registry, vars, &event_type.name, phase, current);
    hook.invoke(&mut ctx).map_err(|source| LogTrawlError::Hook {
        event_type: event_type.name.clone(),
        phase: phase.label(),
        source,
    })
}

/// Mutable state of a run, kept apart from the registry so that a file scan
/// can borrow the registry while events are stored.
struct RunState {
    store: EventStore,
    vars: RunVariables,
    stats: SearchStats,
    last_progress: Instant,
    started: Instant,
}

impl RunState {
    /// Store a finalized event and, unless deferred, run its Match hook and
    /// print its display line.
    fn accept(
        &mut self,
        registry: &EventTypeRegistry,
        options: &SearchOptions,
        event: Event,
        on_display: &mut dyn FnMut(&str),
    ) -> Result<(), LogTrawlError> {
        self.stats.events_found += 1;
        let Some(event_type) = registry.get(event.event_type()) else {
            return Ok(());
        };
        let id = self.store.insert(event);
        if !event_type.immediate && options.chronological {
            return Ok(());
        }

        invoke_hook(
            &mut self.store,
            registry,
            &self.vars,
            event_type,
            HookPhase::Match,
            Some(id),
        )?;
        if self.store.contains(id) {
            self.store.refresh_display(id, registry);
            if !options.chronological {
                self.emit(id, registry, options, on_display);
            }
        }
        Ok(())
    }

    /// Print the display line of an event when its type wants it shown.
    fn emit(
        &mut self,
        id: EventId,
        registry: &EventTypeRegistry,
        options: &SearchOptions,
        on_display: &mut dyn FnMut(&str),
    ) {
        let Some(event) = self.store.get(id) else {
            return;
        };
        let Some(display) = event.display() else {
            return;
        };
        let if_changed = registry
            .get(event.event_type())
            .is_some_and(|t| t.display_if_changed);
        if if_changed && event.changed_fields().is_none() {
            return;
        }
        if options.hide_timestamp {
            on_display(display);
        } else {
            let line = format!(
                "{} {display}",
                event.timestamp().format(constants::TIMESTAMP_FORMAT)
            );
            on_display(&line);
        }
        self.stats.events_displayed += 1;
    }

    fn report_progress(&mut self, pseudo_path: &str) {
        if self.last_progress.elapsed() < Duration::from_secs(constants::PROGRESS_INTERVAL_SECS) {
            return;
        }
        self.last_progress = Instant::now();
        let secs = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            lines = self.stats.lines_read,
            lines_per_sec = (self.stats.lines_read as f64 / secs) as u64,
            events = self.stats.events_found,
            file = pseudo_path,
            "Search progress"
        );
    }
}

/// A search run over any number of log sources.
pub struct SearchSession {
    registry: EventTypeRegistry,
    options: SearchOptions,
    state: RunState,
}

impl SearchSession {
    /// Create the session and run every Init hook.
    pub fn new(registry: EventTypeRegistry, options: SearchOptions) -> Result<Self, LogTrawlError> {
        let vars = RunVariables {
            verbosity: options.verbosity,
            output_directory: options.output_dir.clone(),
            chronological: options.chronological,
            source_filename: None,
            source_path: None,
        };
        let now = Instant::now();
        let mut session = Self {
            state: RunState {
                store: EventStore::new(registry.names()),
                vars,
                stats: SearchStats::default(),
                last_progress: now,
                started: now,
            },
            registry,
            options,
        };

        for event_type in session.registry.iter() {
            invoke_hook(
                &mut session.state.store,
                &session.registry,
                &session.state.vars,
                event_type,
                HookPhase::Init,
                None,
            )?;
        }
        tracing::debug!(event_types = session.registry.len(), "Search session started");
        Ok(session)
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &EventStore {
        &self.state.store
    }

    pub fn stats(&self) -> &SearchStats {
        &self.state.stats
    }

    fn check_cancel(&self) -> Result<(), LogTrawlError> {
        match &self.options.cancel_flag {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(LogTrawlError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Scan every file of every source, in order.
    pub fn search_sources(
        &mut self,
        sources: &[LogSource],
        on_display: &mut dyn FnMut(&str),
    ) -> Result<(), LogTrawlError> {
        for source in sources {
            tracing::debug!(source = %source, "Searching source");
            for file in &source.files {
                self.check_cancel()?;
                self.search_file(file, on_display)?;
            }
        }
        Ok(())
    }

    /// Scan one discovered file. Files no event type applies to are not
    /// opened; files that cannot be opened are skipped with a warning.
    pub fn search_file(
        &mut self,
        file: &DiscoveredFile,
        on_display: &mut dyn FnMut(&str),
    ) -> Result<(), LogTrawlError> {
        if self.registry.matching(&file.pseudo_path).is_empty() {
            tracing::trace!(file = %file.pseudo_path, "No event type applies to file");
            return Ok(());
        }
        let reader = match file.content.open() {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(file = %file.pseudo_path, error = %e, "Could not open file, skipping");
                self.state.stats.files_skipped += 1;
                return Ok(());
            }
        };
        self.scan_reader(reader, &file.pseudo_path, file.modified, on_display)?;
        Ok(())
    }

    /// Scan the lines of `reader` as the file `pseudo_path`. Returns the
    /// number of lines read.
    pub fn scan_reader<R: BufRead>(
        &mut self,
        reader: R,
        pseudo_path: &str,
        modified: NaiveDateTime,
        on_display: &mut dyn FnMut(&str),
    ) -> Result<u64, LogTrawlError> {
        let types = self.registry.matching(pseudo_path);
        if types.is_empty() {
            return Ok(0);
        }

        let state = &mut self.state;
        state.vars.source_filename =
            Some(crate::core::model::base_name(pseudo_path).to_string());
        state.vars.source_path = Some(pseudo_path.to_string());
        for event_type in &types {
            invoke_hook(
                &mut state.store,
                &self.registry,
                &state.vars,
                event_type,
                HookPhase::File,
                None,
            )?;
        }

        let mut scan = FileScan::new(types, pseudo_path, modified, self.options.wait_for_boundary);
        tracing::debug!(file = pseudo_path, "Scanning file");

        for line in lossy_lines(reader) {
            if let Some(flag) = &self.options.cancel_flag {
                if flag.load(Ordering::Relaxed) {
                    return Err(LogTrawlError::Cancelled);
                }
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(
                        file = pseudo_path,
                        line = scan.lines_read() + 1,
                        error = %e,
                        "Read error, ending file early"
                    );
                    break;
                }
            };
            for event in scan.feed(ScanInput::Line(&line)) {
                state.accept(&self.registry, &self.options, event, on_display)?;
            }
            state.stats.lines_read += 1;
            if state.stats.lines_read % constants::PROGRESS_CHECK_LINES == 0 {
                state.report_progress(pseudo_path);
            }
        }
        for event in scan.feed(ScanInput::EndOfStream) {
            state.accept(&self.registry, &self.options, event, on_display)?;
        }

        state.stats.files_scanned += 1;
        state.vars.source_filename = None;
        state.vars.source_path = None;
        Ok(scan.lines_read())
    }

    /// Finish the run: chronological finalization and display, Wrapup hooks,
    /// then export when an output directory is set.
    pub fn wrapup(&mut self, on_display: &mut dyn FnMut(&str)) -> Result<(), LogTrawlError> {
        let registry = &self.registry;
        let options = &self.options;
        let state = &mut self.state;

        if options.chronological {
            state.store.chronological_sort();
            let vars = &state.vars;
            state.store.finalize_display(registry, |store, id| {
                let Some(event_type) = store.get(id).and_then(|e| registry.get(e.event_type()))
                else {
                    return Ok(());
                };
                invoke_hook(store, registry, vars, event_type, HookPhase::Match, Some(id))
            })?;
            let ids = state.store.sequence().to_vec();
            for id in ids {
                state.emit(id, registry, options, on_display);
            }
        }

        for event_type in registry.iter() {
            invoke_hook(
                &mut state.store,
                registry,
                &state.vars,
                event_type,
                HookPhase::Wrapup,
                None,
            )?;
        }

        if let Some(dir) = &options.output_dir {
            state.stats.events_exported = export::export_all(&state.store, registry, dir)?;
        }

        tracing::info!(
            files = state.stats.files_scanned,
            skipped = state.stats.files_skipped,
            lines = state.stats.lines_read,
            events = state.store.len(),
            displayed = state.stats.events_displayed,
            elapsed_ms = state.started.elapsed().as_millis() as u64,
            "Search complete"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hooks::HookLibrary;
    use crate::core::pattern::EventTypeDefinition;
    use crate::core::store::Query;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn modified() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    fn registry(defs: &[EventTypeDefinition]) -> EventTypeRegistry {
        let lib = HookLibrary::default();
        let mut registry = EventTypeRegistry::new();
        for def in defs {
            registry.insert(EventType::compile(def, &lib).unwrap());
        }
        registry
    }

    fn login_def() -> EventTypeDefinition {
        EventTypeDefinition {
            name: Some("LOGIN".into()),
            rex_text: Some(r"login user=(?P<user>\w+) code=(?P<code>\w+)".into()),
            display_on_match: Some("{user} {code}".into()),
            ..EventTypeDefinition::default()
        }
    }

    fn access_def() -> EventTypeDefinition {
        EventTypeDefinition {
            name: Some("ACCESS".into()),
            rex_text: Some(r"access account=(?P<account>\w+)".into()),
            display_on_match: Some("{account} via {code@LOGIN:user=account}".into()),
            ..EventTypeDefinition::default()
        }
    }

    fn run(
        session: &mut SearchSession,
        name: &str,
        text: &str,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        let mut sink = |l: &str| lines.push(l.to_string());
        session
            .scan_reader(Cursor::new(text.to_string()), name, modified(), &mut sink)
            .unwrap();
        session.wrapup(&mut sink).unwrap();
        lines
    }

    #[test]
    fn test_immediate_display_with_lookup() {
        let mut session = SearchSession::new(
            registry(&[login_def(), access_def()]),
            SearchOptions {
                hide_timestamp: true,
                wait_for_boundary: false,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let lines = run(
            &mut session,
            "auth.log",
            "2024-01-02 10:00:00 login user=bob code=A1\n\
             2024-01-02 10:00:01 access account=bob\n\
             2024-01-02 10:00:02 access account=eve\n",
        );
        assert_eq!(
            lines,
            vec!["bob A1", "bob via A1", "eve via NO MATCHING EVENT"]
        );
        assert_eq!(session.stats().events_found, 3);
        assert_eq!(session.stats().lines_read, 3);
    }

    #[test]
    fn test_chronological_run_sorts_across_files() {
        let mut session = SearchSession::new(
            registry(&[login_def(), access_def()]),
            SearchOptions {
                chronological: true,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let mut lines = Vec::new();
        {
            let mut sink = |l: &str| lines.push(l.to_string());
            session
                .scan_reader(
                    Cursor::new("2024-01-02 10:00:05 access account=bob\n"),
                    "b.log",
                    modified(),
                    &mut sink,
                )
                .unwrap();
            session
                .scan_reader(
                    Cursor::new("2024-01-02 09:00:00 login user=bob code=Z9\n"),
                    "a.log",
                    modified(),
                    &mut sink,
                )
                .unwrap();
        }
        assert!(lines.is_empty());
        let mut sink = |l: &str| lines.push(l.to_string());
        session.wrapup(&mut sink).unwrap();
        assert_eq!(
            lines,
            vec![
                "2024-01-02T09:00:00 bob Z9",
                "2024-01-02T10:00:05 bob via Z9"
            ]
        );
        let seqs: Vec<u64> = session.store().iter().map(Event::sequence_number).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_match_hook_deletes_event() {
        let def = EventTypeDefinition {
            exec_on_match: Some("delete_event".into()),
            ..login_def()
        };
        let mut session = SearchSession::new(
            registry(&[def]),
            SearchOptions {
                wait_for_boundary: false,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let lines = run(
            &mut session,
            "auth.log",
            "2024-01-02 10:00:00 login user=bob code=A1\n",
        );
        assert!(lines.is_empty());
        assert!(session.store().is_empty());
        assert!(session.store().get_event(Query::of_type("LOGIN")).is_none());
        assert_eq!(session.stats().events_found, 1);
    }

    #[test]
    fn test_display_if_changed_suppresses_repeats() {
        let def = EventTypeDefinition {
            display_if_changed: Some("true".into()),
            ..login_def()
        };
        let mut session = SearchSession::new(
            registry(&[def]),
            SearchOptions {
                hide_timestamp: true,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let lines = run(
            &mut session,
            "auth.log",
            "2024-01-02 10:00:00 login user=bob code=A1\n\
             2024-01-02 10:00:01 login user=bob code=A1\n\
             2024-01-02 10:00:02 login user=bob code=B2\n",
        );
        assert_eq!(lines, vec!["bob A1", "bob B2"]);
        assert_eq!(session.store().len(), 3);
    }

    #[test]
    fn test_hook_fault_is_fatal_and_names_phase() {
        let def = EventTypeDefinition {
            exec_on_init: Some("delete_event".into()),
            ..login_def()
        };
        let result = SearchSession::new(registry(&[def]), SearchOptions::default());
        assert!(matches!(
            result,
            Err(LogTrawlError::Hook { ref event_type, phase, .. })
                if event_type == "LOGIN" && phase == HookPhase::Init.label()
        ));
    }

    #[test]
    fn test_file_hook_sees_source_variables() {
        let def = EventTypeDefinition {
            exec_on_file: Some("log scanning".into()),
            rex_filename: Some(r"^auth".into()),
            ..login_def()
        };
        let mut session = SearchSession::new(registry(&[def]), SearchOptions::default()).unwrap();
        let mut sink = |_: &str| {};
        let read = session
            .scan_reader(Cursor::new("x\n"), "other.log", modified(), &mut sink)
            .unwrap();
        assert_eq!(read, 0);
        let read = session
            .scan_reader(Cursor::new("x\ny\n"), "dir/auth.log", modified(), &mut sink)
            .unwrap();
        assert_eq!(read, 2);
        assert_eq!(session.stats().files_scanned, 1);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_output_stops_run() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut session = SearchSession::new(
            registry(&[login_def()]),
            SearchOptions {
                hide_timestamp: true,
                wait_for_boundary: false,
                cancel_flag: Some(Arc::clone(&flag)),
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let mut writer = LineWriter::new(ClosedPipe, Arc::clone(&flag));
        let result = session.scan_reader(
            Cursor::new(
                "2024-01-02 10:00:00 login user=bob code=A1\n\
                 2024-01-02 10:00:01 login user=eve code=B2\n\
                 2024-01-02 10:00:02 login user=ann code=C3\n",
            ),
            "auth.log",
            modified(),
            &mut |line: &str| writer.write_line(line),
        );
        assert!(matches!(result, Err(LogTrawlError::Cancelled)));
        assert!(writer.failed());
        assert!(flag.load(Ordering::Relaxed));
        assert_eq!(session.stats().events_found, 1);
    }

    #[test]
    fn test_line_writer_writes_lines() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut writer = LineWriter::new(Vec::new(), Arc::clone(&flag));
        writer.write_line("a");
        writer.write_line("b");
        assert!(!writer.failed());
        assert!(!flag.load(Ordering::Relaxed));
        assert_eq!(writer.out, b"a\nb\n");
    }

    #[test]
    fn test_cancel_flag_stops_run() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut session = SearchSession::new(
            registry(&[login_def()]),
            SearchOptions {
                cancel_flag: Some(Arc::clone(&flag)),
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let mut sink = |_: &str| {};
        let result = session.scan_reader(
            Cursor::new("2024-01-02 10:00:00 login user=bob code=A1\n"),
            "auth.log",
            modified(),
            &mut sink,
        );
        assert!(matches!(result, Err(LogTrawlError::Cancelled)));
    }
}
