// LogTrawl - core/model.rs
//
// Core data model: discovered files and their sources, and events with
// their system, user and virtual fields.

use crate::core::archive::ContentHandle;
use crate::util::constants;
use crate::util::error::FieldError;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Open, ordered string map of user fields. `None` is a present field whose
/// value is unknown (an optional regex group that did not participate).
pub type Fields = BTreeMap<String, Option<String>>;

// =============================================================================
// Discovery model
// =============================================================================

/// What backs a [`LogSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Tar,
    Zip,
    /// Aggregate of log files named directly as roots.
    Loose,
}

impl SourceKind {
    /// Short label used in overviews.
    pub fn label(self) -> &'static str {
        match self {
            Self::Directory => "DIR",
            Self::Tar => "TAR",
            Self::Zip => "ZIP",
            Self::Loose => "LOG",
        }
    }
}

/// A log file found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path on disk, or entry name inside the containing archive.
    pub path: String,

    /// Forward-slash path prefixed by every ancestor archive's pseudo-path.
    pub pseudo_path: String,

    /// Last modification time, second precision, no timezone.
    pub modified: NaiveDateTime,

    /// Uncompressed size in bytes.
    pub size: u64,

    /// Where the content can be read from.
    pub content: ContentHandle,

    /// Named groups of the path filter that took part in the match.
    pub path_fields: BTreeMap<String, String>,
}

impl DiscoveredFile {
    /// Last component of the pseudo-path.
    pub fn file_name(&self) -> &str {
        base_name(&self.pseudo_path)
    }
}

/// Last `/`-separated component of a pseudo-path.
pub fn base_name(pseudo_path: &str) -> &str {
    pseudo_path.rsplit('/').next().unwrap_or(pseudo_path)
}

/// A directory, archive, or the loose-file aggregate, with the log files
/// registered under it.
#[derive(Debug, Clone)]
pub struct LogSource {
    pub kind: SourceKind,
    /// Pseudo-path of the directory or archive; empty for the loose aggregate.
    pub path: String,
    pub files: Vec<DiscoveredFile>,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

impl LogSource {
    pub fn new(kind: SourceKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            files: Vec::new(),
            earliest: None,
            latest: None,
        }
    }

    /// Register a file and widen the source's time range.
    pub fn register(&mut self, file: DiscoveredFile) {
        let t = file.modified;
        self.earliest = Some(self.earliest.map_or(t, |e| e.min(t)));
        self.latest = Some(self.latest.map_or(t, |l| l.max(t)));
        self.files.push(file);
    }

    /// True when a file with this pseudo-path is already registered.
    pub fn contains(&self, pseudo_path: &str) -> bool {
        self.files.iter().any(|f| f.pseudo_path == pseudo_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = |t: Option<NaiveDateTime>| {
            t.map(|t| t.format(constants::OVERVIEW_TIME_FORMAT).to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        write!(
            f,
            "{} -- {} to {} -- {} file(s) -- {}",
            self.kind.label(),
            stamp(self.earliest),
            stamp(self.latest),
            self.files.len(),
            self.path
        )
    }
}

// =============================================================================
// Event identity
// =============================================================================

/// Stable handle of an event inside an event store. Unlike the sequence
/// number it never changes, including across chronological sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) u64);

impl EventId {
    /// Id carried by events that have not been inserted into a store yet.
    pub const PENDING: EventId = EventId(u64::MAX);
}

// =============================================================================
// System and virtual fields
// =============================================================================

/// Engine-reserved fields. Their names can never be written by user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemField {
    Name,
    Description,
    SourcePath,
    SourceFilename,
    Raw,
    LineNumber,
    SequenceNumber,
    Timestamp,
    Date,
    Time,
    ChangedFields,
    DisplayOnMatch,
}

impl SystemField {
    pub const ALL: [SystemField; 12] = [
        Self::Name,
        Self::Description,
        Self::SourcePath,
        Self::SourceFilename,
        Self::Raw,
        Self::LineNumber,
        Self::SequenceNumber,
        Self::Timestamp,
        Self::Date,
        Self::Time,
        Self::ChangedFields,
        Self::DisplayOnMatch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Name => "_name",
            Self::Description => "_description",
            Self::SourcePath => "_source_path",
            Self::SourceFilename => "_source_filename",
            Self::Raw => "_raw",
            Self::LineNumber => "_line_number",
            Self::SequenceNumber => "_sequence_number",
            Self::Timestamp => "_timestamp",
            Self::Date => "_date",
            Self::Time => "_time",
            Self::ChangedFields => "_changed_fields",
            Self::DisplayOnMatch => "_display_on_match",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// Fields computed on read from the stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualField {
    /// `_raw` without line breaks.
    Flat,
    /// `_raw` without the span the timestamp occupied.
    Core,
    /// `_core` without line breaks.
    FlatCore,
    /// User fields as a JSON object.
    UserFields,
    /// System fields as a JSON object.
    SystemFields,
}

impl VirtualField {
    pub const ALL: [VirtualField; 5] = [
        Self::Flat,
        Self::Core,
        Self::FlatCore,
        Self::UserFields,
        Self::SystemFields,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Flat => "_flat",
            Self::Core => "_core",
            Self::FlatCore => "_flat_core",
            Self::UserFields => "_user_fields",
            Self::SystemFields => "_system_fields",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// True for system and virtual field names.
pub fn is_reserved_field(name: &str) -> bool {
    SystemField::from_name(name).is_some() || VirtualField::from_name(name).is_some()
}

/// Fixed-schema storage of system fields.
#[derive(Debug, Clone)]
pub struct SystemFields {
    pub name: String,
    pub description: String,
    pub source_path: String,
    pub source_filename: String,
    pub raw: String,
    /// 1-based line of the first raw line in the source file.
    pub line_number: u64,
    pub sequence_number: u64,
    pub timestamp: NaiveDateTime,
    pub changed_fields: Option<String>,
    pub display_on_match: Option<String>,
}

impl SystemFields {
    /// String value of a system field.
    pub fn get(&self, field: SystemField) -> Option<String> {
        match field {
            SystemField::Name => Some(self.name.clone()),
            SystemField::Description => Some(self.description.clone()),
            SystemField::SourcePath => Some(self.source_path.clone()),
            SystemField::SourceFilename => Some(self.source_filename.clone()),
            SystemField::Raw => Some(self.raw.clone()),
            SystemField::LineNumber => Some(self.line_number.to_string()),
            SystemField::SequenceNumber => Some(self.sequence_number.to_string()),
            SystemField::Timestamp => Some(
                self.timestamp
                    .format(constants::TIMESTAMP_FORMAT)
                    .to_string(),
            ),
            SystemField::Date => Some(self.timestamp.format(constants::DATE_FORMAT).to_string()),
            SystemField::Time => Some(self.timestamp.format(constants::TIME_FORMAT).to_string()),
            SystemField::ChangedFields => self.changed_fields.clone(),
            SystemField::DisplayOnMatch => self.display_on_match.clone(),
        }
    }

    /// All system fields keyed by name.
    pub fn to_map(&self) -> Fields {
        SystemField::ALL
            .iter()
            .map(|f| (f.name().to_string(), self.get(*f)))
            .collect()
    }
}

// =============================================================================
// Event
// =============================================================================

/// One matched occurrence of an event type.
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) id: EventId,
    system: SystemFields,
    user: Fields,
    /// Byte range of the timestamp inside `_raw`; empty when none resolved.
    timestamp_span: Range<usize>,
}

impl Event {
    /// Create an event with default timestamp and empty raw text.
    pub fn new(
        event_type: &str,
        description: &str,
        source_path: &str,
        source_filename: &str,
    ) -> Self {
        Self {
            id: EventId::PENDING,
            system: SystemFields {
                name: event_type.to_string(),
                description: description.to_string(),
                source_path: source_path.to_string(),
                source_filename: source_filename.to_string(),
                raw: String::new(),
                line_number: 0,
                sequence_number: 0,
                timestamp: NaiveDateTime::MIN,
                changed_fields: None,
                display_on_match: None,
            },
            user: Fields::new(),
            timestamp_span: 0..0,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.system.name
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.system.timestamp
    }

    pub fn sequence_number(&self) -> u64 {
        self.system.sequence_number
    }

    pub fn raw(&self) -> &str {
        &self.system.raw
    }

    pub fn line_number(&self) -> u64 {
        self.system.line_number
    }

    pub fn system_fields(&self) -> &SystemFields {
        &self.system
    }

    pub fn user_fields(&self) -> &Fields {
        &self.user
    }

    pub fn display(&self) -> Option<&str> {
        self.system.display_on_match.as_deref()
    }

    pub fn changed_fields(&self) -> Option<&str> {
        self.system.changed_fields.as_deref()
    }

    pub fn timestamp_span(&self) -> Range<usize> {
        self.timestamp_span.clone()
    }

    pub(crate) fn set_raw(&mut self, raw: String, line_number: u64, timestamp_span: Range<usize>) {
        let valid = timestamp_span.start <= timestamp_span.end
            && timestamp_span.end <= raw.len()
            && raw.is_char_boundary(timestamp_span.start)
            && raw.is_char_boundary(timestamp_span.end);
        self.timestamp_span = if valid { timestamp_span } else { 0..0 };
        self.system.raw = raw;
        self.system.line_number = line_number;
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: NaiveDateTime) {
        self.system.timestamp = timestamp;
    }

    pub(crate) fn set_sequence_number(&mut self, seq: u64) {
        self.system.sequence_number = seq;
    }

    pub(crate) fn set_changed_fields(&mut self, changed: Option<String>) {
        self.system.changed_fields = changed;
    }

    pub(crate) fn set_display(&mut self, display: Option<String>) {
        self.system.display_on_match = display;
    }

    /// Insert a captured value unless the name is reserved.
    pub(crate) fn capture_field(&mut self, name: &str, value: Option<String>) {
        if is_reserved_field(name) {
            tracing::debug!(field = name, "Ignoring capture group with a reserved name");
            return;
        }
        self.user.insert(name.to_string(), value);
    }

    /// Value of any user, system or virtual field. The outer `None` means the
    /// field does not exist; the inner one that it exists without a value.
    pub fn get_field(&self, name: &str) -> Option<Option<String>> {
        if let Some(v) = self.user.get(name) {
            return Some(v.clone());
        }
        if let Some(f) = SystemField::from_name(name) {
            return Some(self.system.get(f));
        }
        VirtualField::from_name(name).map(|v| Some(self.virtual_field(v)))
    }

    /// Value of a stored (user or system) field, used for query matching.
    pub fn stored_field(&self, name: &str) -> Option<Option<String>> {
        if let Some(v) = self.user.get(name) {
            return Some(v.clone());
        }
        SystemField::from_name(name).map(|f| self.system.get(f))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.user.contains_key(name) || is_reserved_field(name)
    }

    /// Set a user field, creating it if needed.
    pub fn set_field(&mut self, name: &str, value: Option<String>) -> Result<(), FieldError> {
        if is_reserved_field(name) {
            return Err(FieldError::ReadOnly {
                name: name.to_string(),
            });
        }
        self.user.insert(name.to_string(), value);
        Ok(())
    }

    /// Set several user fields; reserved names are skipped.
    pub fn set_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        for (name, value) in fields {
            if let Err(e) = self.set_field(&name, value) {
                tracing::debug!(error = %e, "Field not set");
            }
        }
    }

    /// Create a user field that must not exist yet.
    pub fn add_field(&mut self, name: &str, value: Option<String>) -> Result<(), FieldError> {
        if self.has_field(name) {
            return Err(if is_reserved_field(name) {
                FieldError::ReadOnly {
                    name: name.to_string(),
                }
            } else {
                FieldError::AlreadyExists {
                    name: name.to_string(),
                }
            });
        }
        self.user.insert(name.to_string(), value);
        Ok(())
    }

    /// Add several user fields; existing and reserved names are skipped.
    pub fn add_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        for (name, value) in fields {
            if let Err(e) = self.add_field(&name, value) {
                tracing::debug!(error = %e, "Field not added");
            }
        }
    }

    /// Seconds elapsed from `other` to this event.
    pub fn seconds_since(&self, other: &Event) -> i64 {
        (self.system.timestamp - other.system.timestamp).num_seconds()
    }

    /// Names of user fields that differ from, or are absent in, `previous`.
    /// Every user field counts as newly present when there is no previous
    /// event, so the first event of a type always shows as changed.
    pub fn changed_since(&self, previous: Option<&Event>) -> Option<String> {
        let changed: Vec<&str> = self
            .user
            .iter()
            .filter(|(k, v)| previous.map_or(true, |p| p.user.get(*k) != Some(*v)))
            .map(|(k, _)| k.as_str())
            .collect();
        if changed.is_empty() {
            None
        } else {
            Some(changed.join(","))
        }
    }

    fn core(&self) -> String {
        let raw = &self.system.raw;
        let span = &self.timestamp_span;
        let mut core = String::with_capacity(raw.len());
        core.push_str(&raw[..span.start]);
        core.push_str(&raw[span.end..]);
        core
    }

    fn virtual_field(&self, field: VirtualField) -> String {
        match field {
            VirtualField::Flat => self.system.raw.replace('\n', ""),
            VirtualField::Core => self.core(),
            VirtualField::FlatCore => self.core().replace('\n', ""),
            VirtualField::UserFields => to_json(&self.user),
            VirtualField::SystemFields => to_json(&self.system.to_map()),
        }
    }
}

fn to_json(fields: &Fields) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} {} {}:{}",
            self.system.name,
            self.system.sequence_number,
            self.system.timestamp.format(constants::TIMESTAMP_FORMAT),
            self.system.source_path,
            self.system.line_number
        )?;
        for (k, v) in &self.user {
            write!(f, " {k}={}", v.as_deref().unwrap_or(constants::NOT_AVAILABLE))?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
