// LogTrawl - core/export.rs
//
// Per-event-type export: reduced XML, full XML and semicolon CSV.
// The writers accept any `Write`; `export_all` creates the files.

use crate::core::model::{Event, SystemField, VirtualField};
use crate::core::pattern::EventTypeRegistry;
use crate::core::store::EventStore;
use crate::util::constants;
use crate::util::error::ExportError;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// System fields written first in the reduced XML.
const REDUCED_LEADING: [&str; 1] = ["_timestamp"];

/// Fields written after the user fields in the reduced XML.
const REDUCED_TRAILING: [&str; 3] = ["_flat", "_source_path", "_line_number"];

/// Leading CSV columns.
const CSV_SYSTEM_COLUMNS: [&str; 5] = [
    "_timestamp",
    "_name",
    "_display_on_match",
    "_changed_fields",
    "_flat",
];

// =============================================================================
// XML
// =============================================================================

/// Turn a field name into a usable XML element name.
fn element_name(field: &str) -> String {
    let mut name: String = field
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

fn indent<W: Write>(writer: &mut Writer<W>, level: usize) -> io::Result<()> {
    let text = format!("\n{}", "  ".repeat(level));
    writer.write_event(XmlEvent::Text(BytesText::from_escaped(text)))
}

/// Split text so that no CDATA section contains `]]>`.
fn cdata_parts(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("]]>") {
        parts.push(&rest[..pos + 2]);
        rest = &rest[pos + 2..];
    }
    parts.push(rest);
    parts
}

fn write_field<W: Write>(
    writer: &mut Writer<W>,
    field: &str,
    value: Option<&str>,
    as_cdata: bool,
) -> io::Result<()> {
    let name = element_name(field);
    indent(writer, 2)?;
    writer.write_event(XmlEvent::Start(BytesStart::new(name.as_str())))?;
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        if as_cdata {
            for part in cdata_parts(value) {
                writer.write_event(XmlEvent::CData(BytesCData::new(part)))?;
            }
        } else {
            writer.write_event(XmlEvent::Text(BytesText::new(value)))?;
        }
    }
    writer.write_event(XmlEvent::End(BytesEnd::new(name.as_str())))
}

fn write_xml<'e, W, I, F>(out: W, events: I, mut write_event_fields: F) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'e Event>,
    F: FnMut(&mut Writer<W>, &Event) -> io::Result<()>,
{
    let mut writer = Writer::new(out);
    writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    indent(&mut writer, 0)?;
    writer.write_event(XmlEvent::Start(BytesStart::new(constants::EXPORT_XML_ROOT)))?;

    let mut count = 0;
    for event in events {
        indent(&mut writer, 1)?;
        writer.write_event(XmlEvent::Start(BytesStart::new(constants::EXPORT_XML_EVENT)))?;
        write_event_fields(&mut writer, event)?;
        indent(&mut writer, 1)?;
        writer.write_event(XmlEvent::End(BytesEnd::new(constants::EXPORT_XML_EVENT)))?;
        count += 1;
    }

    indent(&mut writer, 0)?;
    writer.write_event(XmlEvent::End(BytesEnd::new(constants::EXPORT_XML_ROOT)))?;
    indent(&mut writer, 0)?;
    writer.into_inner().flush()?;
    Ok(count)
}

fn field_text(event: &Event, name: &str) -> Option<String> {
    event.get_field(name).flatten()
}

/// Reduced XML: `_timestamp`, the user fields sorted by name, then `_flat`,
/// `_source_path` and `_line_number`, as escaped text.
pub fn write_reduced_xml<'e, W, I>(out: W, events: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'e Event>,
{
    write_xml(out, events, |writer, event| {
        for name in REDUCED_LEADING {
            write_field(writer, name, field_text(event, name).as_deref(), false)?;
        }
        for (name, value) in event.user_fields() {
            write_field(writer, name, value.as_deref(), false)?;
        }
        for name in REDUCED_TRAILING {
            write_field(writer, name, field_text(event, name).as_deref(), false)?;
        }
        Ok(())
    })
}

/// Full XML: every system and virtual field sorted by name, then the user
/// fields sorted by name, as CDATA.
pub fn write_full_xml<'e, W, I>(out: W, events: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'e Event>,
{
    let mut reserved: Vec<&str> = SystemField::ALL
        .iter()
        .map(|f| f.name())
        .chain(VirtualField::ALL.iter().map(|f| f.name()))
        .collect();
    reserved.sort_unstable();

    write_xml(out, events, |writer, event| {
        for name in &reserved {
            write_field(writer, name, field_text(event, name).as_deref(), true)?;
        }
        for (name, value) in event.user_fields() {
            write_field(writer, name, value.as_deref(), true)?;
        }
        Ok(())
    })
}

// =============================================================================
// CSV
// =============================================================================

fn csv_value(value: Option<String>) -> String {
    value
        .unwrap_or_default()
        .replace(['\n', '\r', ';'], " ")
}

/// Semicolon CSV. Columns are a fixed set of system fields followed by the
/// user fields of the first event, sorted. Every record ends with `;`.
pub fn write_csv<'e, W, I>(out: W, events: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'e Event>,
{
    let mut events = events.into_iter().peekable();
    let user_columns: Vec<String> = events
        .peek()
        .map(|first| first.user_fields().keys().cloned().collect())
        .unwrap_or_default();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(constants::CSV_DELIMITER)
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(out);

    let header: Vec<&str> = CSV_SYSTEM_COLUMNS
        .iter()
        .copied()
        .chain(user_columns.iter().map(String::as_str))
        .chain(std::iter::once(""))
        .collect();
    writer.write_record(&header)?;

    let mut count = 0;
    for event in events {
        let record: Vec<String> = CSV_SYSTEM_COLUMNS
            .iter()
            .copied()
            .chain(user_columns.iter().map(String::as_str))
            .map(|name| csv_value(field_text(event, name)))
            .chain(std::iter::once(String::new()))
            .collect();
        writer.write_record(&record)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

// =============================================================================
// Files
// =============================================================================

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn export_type(store: &EventStore, name: &str, dir: &Path) -> Result<usize, ExportError> {
    let base = element_name(name);
    let xml_path = dir.join(format!("{base}.xml"));
    let full_path = dir.join(format!("{base}.full.xml"));
    let csv_path = dir.join(format!("{base}.csv"));
    let io_error = |path: &PathBuf| {
        let path = path.clone();
        move |source| ExportError::Io { path, source }
    };

    let count = write_reduced_xml(create(&xml_path)?, store.events_of_type(name))
        .map_err(io_error(&xml_path))?;
    write_full_xml(create(&full_path)?, store.events_of_type(name))
        .map_err(io_error(&full_path))?;
    write_csv(create(&csv_path)?, store.events_of_type(name)).map_err(|source| {
        ExportError::Csv {
            path: csv_path.clone(),
            source,
        }
    })?;

    tracing::debug!(event_type = name, events = count, dir = %dir.display(), "Event type exported");
    Ok(count)
}

/// Write the three export files of every registered event type into `dir`,
/// creating it if needed. Types without events get files with no records.
/// Returns the number of events exported.
pub fn export_all(
    store: &EventStore,
    registry: &EventTypeRegistry,
    dir: &Path,
) -> Result<usize, ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut total = 0;
    for name in registry.names() {
        total += export_type(store, name, dir)?;
    }
    tracing::info!(events = total, dir = %dir.display(), "Export complete");
    Ok(total)
}

// =============================================================================
// Tests
// =============================================================================
