// LogTrawl - core/pattern.rs
//
// Event type definitions: pattern XML documents, compilation into runtime
// event types, the registry, and in-place document updates.
// Core layer: works on document text only. File I/O lives in
// app::pattern_mgr.

use crate::core::hooks::{HookLibrary, HookPhase, HookSet};
use crate::core::model::base_name;
use crate::util::constants;
use crate::util::error::PatternError;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::path::Path;

// =============================================================================
// XML deserialization structures (raw input)
// =============================================================================

/// One `<EventType>` block as written. Every element is optional text;
/// empty elements count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventTypeDefinition {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "RexFilename")]
    pub rex_filename: Option<String>,
    #[serde(rename = "RexText")]
    pub rex_text: Option<String>,
    #[serde(rename = "RexTimestamp")]
    pub rex_timestamp: Option<String>,
    #[serde(rename = "MultilineCount")]
    pub multiline_count: Option<String>,
    #[serde(rename = "CaseSensitive")]
    pub case_sensitive: Option<String>,
    #[serde(rename = "DisplayOnMatch")]
    pub display_on_match: Option<String>,
    #[serde(rename = "DisplayIfChanged")]
    pub display_if_changed: Option<String>,
    #[serde(rename = "Immediate")]
    pub immediate: Option<String>,
    #[serde(rename = "ExecOnInit")]
    pub exec_on_init: Option<String>,
    #[serde(rename = "ExecOnFile")]
    pub exec_on_file: Option<String>,
    #[serde(rename = "ExecOnMatch")]
    pub exec_on_match: Option<String>,
    #[serde(rename = "ExecOnWrapup")]
    pub exec_on_wrapup: Option<String>,
}

/// Root element. `<EventType>` children may be interleaved with any other
/// elements, which are skipped.
#[derive(Debug, Default, Deserialize)]
struct PatternDocument {
    #[serde(rename = "EventType", default)]
    event_types: Vec<EventTypeDefinition>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some("true")
}

fn flag_text(on: bool) -> Option<String> {
    on.then(|| "true".to_string())
}

impl EventTypeDefinition {
    pub fn hook_body(&self, phase: HookPhase) -> Option<&str> {
        present(match phase {
            HookPhase::Init => &self.exec_on_init,
            HookPhase::File => &self.exec_on_file,
            HookPhase::Match => &self.exec_on_match,
            HookPhase::Wrapup => &self.exec_on_wrapup,
        })
    }

    /// Name with the default applied.
    pub fn effective_name(&self) -> &str {
        present(&self.name).map_or(constants::DEFAULT_EVENT_TYPE_NAME, str::trim)
    }
}

// =============================================================================
// Compiled event type
// =============================================================================

/// A compiled, immutable event type.
#[derive(Debug, Clone)]
pub struct EventType {
    pub name: String,
    pub description: String,
    pub rex_filename: String,
    pub rex_text: String,
    pub rex_timestamp: String,
    /// Number of backlog lines the text regex is matched against.
    pub multiline_count: usize,
    pub case_sensitive: bool,
    pub display_on_match: Option<String>,
    pub display_if_changed: bool,
    /// Run the Match hook and render the display at match time.
    pub immediate: bool,
    pub hooks: HookSet,
    filename_regex: Regex,
    text_regex: Regex,
    timestamp_regex: Regex,
}

/// Compile a regex with length validation.
fn compile_regex(
    event_type: &str,
    field: &'static str,
    pattern: &str,
    configure: impl FnOnce(&mut RegexBuilder) -> &mut RegexBuilder,
) -> Result<Regex, PatternError> {
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(PatternError::RegexTooLong {
            event_type: event_type.to_string(),
            field,
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }
    let mut builder = RegexBuilder::new(pattern);
    configure(&mut builder)
        .build()
        .map_err(|source| PatternError::InvalidRegex {
            event_type: event_type.to_string(),
            field,
            pattern: pattern.to_string(),
            source,
        })
}

impl EventType {
    /// Validate a definition and compile its regexes and hooks.
    pub fn compile(
        def: &EventTypeDefinition,
        library: &HookLibrary,
    ) -> Result<Self, PatternError> {
        let name = def.effective_name().to_string();

        let multiline_count = match present(&def.multiline_count) {
            None => 1,
            Some(text) => text
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=constants::MAX_MULTILINE_COUNT).contains(n))
                .ok_or_else(|| PatternError::InvalidValue {
                    event_type: name.clone(),
                    field: "MultilineCount",
                    value: text.to_string(),
                    reason: format!(
                        "expected a whole number from 1 to {}",
                        constants::MAX_MULTILINE_COUNT
                    ),
                })?,
        };
        let case_sensitive = flag(&def.case_sensitive);

        let rex_filename = present(&def.rex_filename)
            .unwrap_or(constants::DEFAULT_REX_FILENAME)
            .to_string();
        let rex_text = present(&def.rex_text)
            .unwrap_or(constants::DEFAULT_REX_TEXT)
            .to_string();
        let rex_timestamp = present(&def.rex_timestamp)
            .unwrap_or(constants::DEFAULT_REX_TIMESTAMP)
            .to_string();

        let filename_regex = compile_regex(&name, "RexFilename", &rex_filename, |b| b)?;
        let text_regex = compile_regex(&name, "RexText", &rex_text, |b| {
            b.case_insensitive(!case_sensitive)
                .dot_matches_new_line(multiline_count > 1)
                .multi_line(multiline_count > 1)
        })?;
        let timestamp_regex = compile_regex(&name, "RexTimestamp", &rex_timestamp, |b| b)?;

        let mut hooks = HookSet::default();
        for phase in HookPhase::ALL {
            if let Some(body) = def.hook_body(phase) {
                let compiled =
                    library
                        .compile(body)
                        .map_err(|source| PatternError::InvalidHook {
                            event_type: name.clone(),
                            field: phase.field_name(),
                            source,
                        })?;
                *hooks.slot_mut(phase) = Some(compiled);
            }
        }

        Ok(Self {
            description: present(&def.description)
                .unwrap_or(constants::DEFAULT_DESCRIPTION)
                .to_string(),
            rex_filename,
            rex_text,
            rex_timestamp,
            multiline_count,
            case_sensitive,
            display_on_match: present(&def.display_on_match).map(str::to_string),
            display_if_changed: flag(&def.display_if_changed),
            immediate: flag(&def.immediate),
            hooks,
            filename_regex,
            text_regex,
            timestamp_regex,
            name,
        })
    }

    /// Unanchored search of the filename regex on the last path component.
    pub fn filename_matches(&self, pseudo_path: &str) -> bool {
        self.filename_regex.is_match(base_name(pseudo_path))
    }

    pub fn text_regex(&self) -> &Regex {
        &self.text_regex
    }

    pub fn timestamp_regex(&self) -> &Regex {
        &self.timestamp_regex
    }

    /// The definition this type would be saved as.
    pub fn to_definition(&self) -> EventTypeDefinition {
        let hook = |phase| self.hooks.get(phase).map(|h| h.source().to_string());
        EventTypeDefinition {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            rex_filename: Some(self.rex_filename.clone()),
            rex_text: Some(self.rex_text.clone()),
            rex_timestamp: Some(self.rex_timestamp.clone()),
            multiline_count: (self.multiline_count > 1).then(|| self.multiline_count.to_string()),
            case_sensitive: flag_text(self.case_sensitive),
            display_on_match: self.display_on_match.clone(),
            display_if_changed: flag_text(self.display_if_changed),
            immediate: flag_text(self.immediate),
            exec_on_init: hook(HookPhase::Init),
            exec_on_file: hook(HookPhase::File),
            exec_on_match: hook(HookPhase::Match),
            exec_on_wrapup: hook(HookPhase::Wrapup),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event type {}", self.name)?;
        writeln!(f, "  Description: {}", self.description)?;
        writeln!(f, "  Filename regex: {}", self.rex_filename)?;
        writeln!(f, "  Text regex: {}", self.rex_text)?;
        writeln!(f, "  Timestamp regex: {}", self.rex_timestamp)?;
        writeln!(f, "  Multiline count: {}", self.multiline_count)?;
        writeln!(f, "  Case sensitive: {}", self.case_sensitive)?;
        writeln!(
            f,
            "  Display on match: {}",
            self.display_on_match.as_deref().unwrap_or(constants::NOT_AVAILABLE)
        )?;
        writeln!(f, "  Display if changed: {}", self.display_if_changed)?;
        writeln!(f, "  Immediate: {}", self.immediate)?;
        for phase in HookPhase::ALL {
            if let Some(hook) = self.hooks.get(phase) {
                writeln!(f, "  {}:", phase.field_name())?;
                for line in hook.source().lines() {
                    writeln!(f, "    {line}")?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Compiled event types in load order, unique by name.
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    types: Vec<EventType>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event type, replacing one with the same name in place.
    pub fn insert(&mut self, event_type: EventType) {
        match self.types.iter_mut().find(|t| t.name == event_type.name) {
            Some(existing) => {
                tracing::debug!(event_type = %event_type.name, "Replacing event type definition");
                *existing = event_type;
            }
            None => self.types.push(event_type),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EventType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.types.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Event types whose filename regex accepts the file.
    pub fn matching(&self, pseudo_path: &str) -> Vec<&EventType> {
        self.types
            .iter()
            .filter(|t| t.filename_matches(pseudo_path))
            .collect()
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Parse pattern XML into raw definitions. Every definition must carry a
/// name. `path` is used for error messages only.
pub fn parse_document(xml: &str, path: &Path) -> Result<Vec<EventTypeDefinition>, PatternError> {
    let doc: PatternDocument =
        quick_xml::de::from_str(xml).map_err(|source| PatternError::XmlParse {
            path: path.to_path_buf(),
            source,
        })?;
    for (index, def) in doc.event_types.iter().enumerate() {
        if present(&def.name).is_none() {
            return Err(PatternError::MissingField {
                event_type: format!("<unnamed #{}>", index + 1),
                field: "Name",
            });
        }
    }
    Ok(doc.event_types)
}

/// Parse and compile every definition of a document.
pub fn compile_document(
    xml: &str,
    path: &Path,
    library: &HookLibrary,
) -> Result<Vec<EventType>, PatternError> {
    parse_document(xml, path)?
        .iter()
        .map(|def| EventType::compile(def, library))
        .collect()
}

/// CDATA section text, splitting any `]]>` across two sections.
fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// Serialise one definition as an `<EventType>` block. Absent and empty
/// values are omitted; regex and hook bodies are written as CDATA.
pub fn definition_to_xml(def: &EventTypeDefinition) -> String {
    let multiline = present(&def.multiline_count)
        .filter(|v| v.trim().parse::<usize>().map_or(true, |n| n > 1))
        .map(|v| v.trim().to_string());
    let elements: [(&str, Option<String>, bool); 14] = [
        ("Name", Some(def.effective_name().to_string()), false),
        ("Description", present(&def.description).map(str::to_string), false),
        ("RexFilename", present(&def.rex_filename).map(str::to_string), true),
        ("RexText", present(&def.rex_text).map(str::to_string), true),
        ("MultilineCount", multiline, false),
        ("CaseSensitive", flag_text(flag(&def.case_sensitive)), false),
        ("RexTimestamp", present(&def.rex_timestamp).map(str::to_string), true),
        ("DisplayOnMatch", present(&def.display_on_match).map(str::to_string), false),
        ("DisplayIfChanged", flag_text(flag(&def.display_if_changed)), false),
        ("Immediate", flag_text(flag(&def.immediate)), false),
        ("ExecOnInit", def.hook_body(HookPhase::Init).map(str::to_string), true),
        ("ExecOnFile", def.hook_body(HookPhase::File).map(str::to_string), true),
        ("ExecOnMatch", def.hook_body(HookPhase::Match).map(str::to_string), true),
        ("ExecOnWrapup", def.hook_body(HookPhase::Wrapup).map(str::to_string), true),
    ];

    let mut xml = String::from("<EventType>\n");
    for (tag, value, as_cdata) in elements {
        let Some(value) = value else { continue };
        let body = if as_cdata {
            cdata(&value)
        } else {
            quick_xml::escape::escape(value.as_str()).into_owned()
        };
        xml.push_str(&format!("    <{tag}>{body}</{tag}>\n"));
    }
    xml.push_str("  </EventType>");
    xml
}

/// A fresh document holding one block.
pub fn new_document(block: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Patterns>\n  {block}\n</Patterns>\n")
}

/// Where an update goes inside an existing document.
enum UpdateSite {
    /// Byte range of the `<EventType>` block with the same name.
    Replace(Range<usize>),
    /// Position of the root's closing tag.
    Append(usize),
    /// Byte range of an empty root element.
    ExpandEmptyRoot(Range<usize>),
    /// No root element.
    NewDocument,
}

fn text_of(raw: &[u8], unescaped: Option<String>) -> String {
    unescaped.unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned())
}

fn locate_update(document: &str, name: &str, path: &Path) -> Result<UpdateSite, PatternError> {
    let mut reader = Reader::from_str(document);
    let mut depth = 0usize;
    let mut block_start: Option<usize> = None;
    let mut in_name = false;
    let mut block_name = String::new();
    let mut site = UpdateSite::NewDocument;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|source| PatternError::XmlScan {
            path: path.to_path_buf(),
            source,
        })?;
        let after = reader.buffer_position() as usize;
        match event {
            XmlEvent::Start(e) => {
                depth += 1;
                if depth == 2 && e.name().as_ref() == b"EventType" {
                    block_start = Some(before);
                    block_name.clear();
                }
                in_name = depth == 3 && block_start.is_some() && e.name().as_ref() == b"Name";
            }
            XmlEvent::End(_) => {
                match depth {
                    3 => in_name = false,
                    2 => {
                        if let Some(start) = block_start.take() {
                            if block_name.trim() == name {
                                return Ok(UpdateSite::Replace(start..after));
                            }
                        }
                    }
                    1 => site = UpdateSite::Append(before),
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            XmlEvent::Empty(_) if depth == 0 => site = UpdateSite::ExpandEmptyRoot(before..after),
            XmlEvent::Text(t) if in_name => {
                let unescaped = t.unescape().ok().map(|c| c.into_owned());
                block_name.push_str(&text_of(&t, unescaped));
            }
            XmlEvent::CData(c) if in_name => {
                block_name.push_str(&text_of(&c, None));
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(site)
}

/// Insert or replace the block of `def` in `document`. Everything outside
/// the replaced block is kept verbatim. An empty document becomes a new one.
pub fn upsert_definition(
    document: &str,
    def: &EventTypeDefinition,
    path: &Path,
) -> Result<String, PatternError> {
    let block = definition_to_xml(def);
    if document.trim().is_empty() {
        return Ok(new_document(&block));
    }
    let updated = match locate_update(document, def.effective_name(), path)? {
        UpdateSite::Replace(range) => {
            format!("{}{}{}", &document[..range.start], block, &document[range.end..])
        }
        UpdateSite::Append(at) => {
            let head = &document[..at];
            let separator = if head.ends_with('\n') { "" } else { "\n" };
            format!("{head}{separator}  {block}\n{}", &document[at..])
        }
        UpdateSite::ExpandEmptyRoot(range) => format!(
            "{}<Patterns>\n  {}\n</Patterns>{}",
            &document[..range.start],
            block,
            &document[range.end..]
        ),
        UpdateSite::NewDocument => new_document(&block),
    };
    Ok(updated)
}

// =============================================================================
// Tests
// =============================================================================
