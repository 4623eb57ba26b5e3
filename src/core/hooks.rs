// LogTrawl - core/hooks.rs
//
// Hook extension points of event types.
//
// Hook bodies are not executed as scripts. Each body is a list of lines
// `function [argument]`, compiled at load time against a library of
// statically linked functions sharing one contract:
// `fn(&mut HookContext, &str) -> Result<(), HookError>`. Applications can
// register their own functions next to the built-ins before loading patterns.

use crate::core::model::{is_reserved_field, Event, EventId};
use crate::core::pattern::EventTypeRegistry;
use crate::core::store::{EventStore, Query, QueryIter};
use crate::core::template;
use crate::util::error::HookError;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

// =============================================================================
// Phases and run variables
// =============================================================================

/// The four extension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Once per event type before any file is scanned.
    Init,
    /// Once per event type per source file its filename regex accepts.
    File,
    /// Once per finalized event.
    Match,
    /// Once per event type at the end of the run.
    Wrapup,
}

impl HookPhase {
    pub const ALL: [HookPhase; 4] = [Self::Init, Self::File, Self::Match, Self::Wrapup];

    pub fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::File => "file",
            Self::Match => "match",
            Self::Wrapup => "wrapup",
        }
    }

    /// Element name of the hook body in pattern documents.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Init => "ExecOnInit",
            Self::File => "ExecOnFile",
            Self::Match => "ExecOnMatch",
            Self::Wrapup => "ExecOnWrapup",
        }
    }
}

/// Run-level values visible to hooks.
#[derive(Debug, Clone, Default)]
pub struct RunVariables {
    pub verbosity: u8,
    pub output_directory: Option<PathBuf>,
    pub chronological: bool,
    /// Set while a source file is being scanned.
    pub source_filename: Option<String>,
    pub source_path: Option<String>,
}

// =============================================================================
// Context
// =============================================================================

/// Everything a hook function can reach. The current event is re-checked
/// against the store on every access since any hook may delete it.
pub struct HookContext<'a> {
    pub store: &'a mut EventStore,
    pub registry: &'a EventTypeRegistry,
    pub vars: &'a RunVariables,
    pub event_type: &'a str,
    pub phase: HookPhase,
    current: Option<EventId>,
}

impl<'a> HookContext<'a> {
    pub fn new(
        store: &'a mut EventStore,
        registry: &'a EventTypeRegistry,
        vars: &'a RunVariables,
        event_type: &'a str,
        phase: HookPhase,
        current: Option<EventId>,
    ) -> Self {
        Self {
            store,
            registry,
            vars,
            event_type,
            phase,
            current,
        }
    }

    /// The current event, if the phase has one and it still exists.
    pub fn current(&self) -> Option<&Event> {
        self.current.and_then(|id| self.store.get(id))
    }

    pub fn current_mut(&mut self) -> Option<&mut Event> {
        let id = self.current?;
        self.store.get_mut(id)
    }

    fn require_current(&self, function: &str) -> Result<EventId, HookError> {
        self.current
            .filter(|id| self.store.contains(*id))
            .ok_or_else(|| HookError::NoCurrentEvent {
                function: function.to_string(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.current().is_some_and(|e| e.has_field(name))
    }

    pub fn get_field(&self, name: &str) -> Option<Option<String>> {
        self.current().and_then(|e| e.get_field(name))
    }

    pub fn set_field(&mut self, name: &str, value: Option<String>) -> Result<(), HookError> {
        self.require_current("set_field")?;
        match self.current_mut() {
            Some(event) => Ok(event.set_field(name, value)?),
            None => Err(HookError::NoCurrentEvent {
                function: "set_field".to_string(),
            }),
        }
    }

    pub fn add_field(&mut self, name: &str, value: Option<String>) -> Result<(), HookError> {
        self.require_current("add_field")?;
        match self.current_mut() {
            Some(event) => Ok(event.add_field(name, value)?),
            None => Err(HookError::NoCurrentEvent {
                function: "add_field".to_string(),
            }),
        }
    }

    /// Delete the current event. Returns false when there was none.
    pub fn delete_current(&mut self) -> bool {
        match self.current {
            Some(id) => self.store.delete(id),
            None => false,
        }
    }

    pub fn delete_event(&mut self, id: EventId) -> bool {
        self.store.delete(id)
    }

    pub fn get_event(&self, query: Query) -> Option<&Event> {
        self.store.get_event(query)
    }

    pub fn get_events(&self, query: Query) -> QueryIter<'_> {
        self.store.query(query)
    }

    /// The event of the same type immediately before the current one.
    pub fn previous_of_type(&self) -> Option<&Event> {
        self.current.and_then(|id| self.store.predecessor_of_type(id))
    }

    /// Seconds from `other` to the current event.
    pub fn seconds_since(&self, other: EventId) -> Option<i64> {
        let current = self.current()?;
        let other = self.store.get(other)?;
        Some(current.seconds_since(other))
    }

    /// Render a template against the current event. Without one only the
    /// escape sequences are expanded.
    pub fn render(&self, template_text: &str) -> String {
        match self.current() {
            Some(event) => template::render(template_text, event, &*self.store),
            None => template::expand_escapes(template_text),
        }
    }
}

// =============================================================================
// Library and compiled hooks
// =============================================================================

/// Signature shared by every hook function.
pub type HookFn = fn(&mut HookContext<'_>, &str) -> Result<(), HookError>;

/// Load-time validation of a function's argument text.
pub type ArgumentCheck = fn(&str) -> Result<(), String>;

#[derive(Clone, Copy)]
struct HookFunction {
    run: HookFn,
    check: Option<ArgumentCheck>,
}

/// Named hook functions available to pattern documents.
#[derive(Clone)]
pub struct HookLibrary {
    functions: BTreeMap<String, HookFunction>,
}

impl HookLibrary {
    /// A library without the built-ins.
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, run: HookFn) {
        self.functions
            .insert(name.to_string(), HookFunction { run, check: None });
    }

    pub fn register_checked(&mut self, name: &str, run: HookFn, check: ArgumentCheck) {
        self.functions.insert(
            name.to_string(),
            HookFunction {
                run,
                check: Some(check),
            },
        );
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Compile a hook body. Blank lines and `#` comments are ignored.
    pub fn compile(&self, body: &str) -> Result<CompiledHook, HookError> {
        let mut steps = Vec::new();
        for (index, raw_line) in body.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, argument) = match line.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest.trim()),
                None => (line, ""),
            };
            let function =
                self.functions
                    .get(name)
                    .ok_or_else(|| HookError::UnknownFunction {
                        name: name.to_string(),
                        line: index + 1,
                    })?;
            if let Some(check) = function.check {
                check(argument).map_err(|reason| HookError::InvalidArgument {
                    function: name.to_string(),
                    line: index + 1,
                    reason,
                })?;
            }
            steps.push(HookStep {
                function: name.to_string(),
                run: function.run,
                argument: argument.to_string(),
            });
        }
        Ok(CompiledHook {
            source: body.to_string(),
            steps,
        })
    }
}

impl Default for HookLibrary {
    /// The library with every built-in function registered.
    fn default() -> Self {
        let mut lib = Self::empty();
        lib.register("delete_event", builtin_delete_event);
        lib.register("delete_if_unchanged", builtin_delete_if_unchanged);
        lib.register_checked("set_field", builtin_set_field, check_assignment);
        lib.register_checked("add_field", builtin_add_field, check_assignment);
        lib.register("print", builtin_print);
        lib.register("log", builtin_log);
        lib
    }
}

impl fmt::Debug for HookLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

#[derive(Clone)]
struct HookStep {
    function: String,
    run: HookFn,
    argument: String,
}

/// A hook body bound to library functions.
#[derive(Clone)]
pub struct CompiledHook {
    source: String,
    steps: Vec<HookStep>,
}

impl CompiledHook {
    /// The body text as written in the pattern document.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run every step in order. In the match phase the remaining steps are
    /// skipped once the current event has been deleted.
    pub fn invoke(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        for step in &self.steps {
            if ctx.phase == HookPhase::Match && ctx.current().is_none() {
                break;
            }
            tracing::trace!(
                event_type = ctx.event_type,
                phase = ctx.phase.label(),
                function = %step.function,
                "Running hook step"
            );
            (step.run)(ctx, &step.argument)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompiledHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| &s.function))
            .finish()
    }
}

/// Compiled hooks of one event type, one slot per phase.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    pub init: Option<CompiledHook>,
    pub file: Option<CompiledHook>,
    pub on_match: Option<CompiledHook>,
    pub wrapup: Option<CompiledHook>,
}

impl HookSet {
    pub fn get(&self, phase: HookPhase) -> Option<&CompiledHook> {
        match phase {
            HookPhase::Init => self.init.as_ref(),
            HookPhase::File => self.file.as_ref(),
            HookPhase::Match => self.on_match.as_ref(),
            HookPhase::Wrapup => self.wrapup.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, phase: HookPhase) -> &mut Option<CompiledHook> {
        match phase {
            HookPhase::Init => &mut self.init,
            HookPhase::File => &mut self.file,
            HookPhase::Match => &mut self.on_match,
            HookPhase::Wrapup => &mut self.wrapup,
        }
    }
}

// =============================================================================
// Built-in functions
// =============================================================================

/// Split `NAME = TEMPLATE`.
fn parse_assignment(argument: &str) -> Result<(&str, &str), String> {
    let (name, template_text) = argument
        .split_once('=')
        .ok_or_else(|| "expected 'NAME = TEMPLATE'".to_string())?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("'{name}' is not a valid field name"));
    }
    if is_reserved_field(name) {
        return Err(format!("'{name}' is a reserved field"));
    }
    Ok((name, template_text.trim()))
}

fn check_assignment(argument: &str) -> Result<(), String> {
    parse_assignment(argument).map(|_| ())
}

fn assignment<'s>(function: &str, argument: &'s str) -> Result<(&'s str, &'s str), HookError> {
    parse_assignment(argument).map_err(|reason| HookError::InvalidArgument {
        function: function.to_string(),
        line: 0,
        reason,
    })
}

fn builtin_delete_event(ctx: &mut HookContext<'_>, _argument: &str) -> Result<(), HookError> {
    let id = ctx.require_current("delete_event")?;
    ctx.store.delete(id);
    Ok(())
}

fn builtin_delete_if_unchanged(
    ctx: &mut HookContext<'_>,
    _argument: &str,
) -> Result<(), HookError> {
    let id = ctx.require_current("delete_if_unchanged")?;
    let unchanged = match (ctx.store.get(id), ctx.store.predecessor_of_type(id)) {
        (Some(current), Some(previous)) => current.user_fields() == previous.user_fields(),
        _ => false,
    };
    if unchanged {
        ctx.store.delete(id);
    }
    Ok(())
}

fn builtin_set_field(ctx: &mut HookContext<'_>, argument: &str) -> Result<(), HookError> {
    let (name, template_text) = assignment("set_field", argument)?;
    let value = ctx.render(template_text);
    ctx.set_field(name, Some(value))
}

fn builtin_add_field(ctx: &mut HookContext<'_>, argument: &str) -> Result<(), HookError> {
    let (name, template_text) = assignment("add_field", argument)?;
    let value = ctx.render(template_text);
    ctx.add_field(name, Some(value))
}

fn builtin_print(ctx: &mut HookContext<'_>, argument: &str) -> Result<(), HookError> {
    let line = ctx.render(argument);
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}").map_err(|source| HookError::Io {
        function: "print".to_string(),
        source,
    })
}

fn builtin_log(ctx: &mut HookContext<'_>, argument: &str) -> Result<(), HookError> {
    tracing::info!(
        event_type = ctx.event_type,
        phase = ctx.phase.label(),
        "{}",
        ctx.render(argument)
    );
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
