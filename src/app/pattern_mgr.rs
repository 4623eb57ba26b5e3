// LogTrawl - app/pattern_mgr.rs
//
// Loads pattern documents from disk into an event type registry and writes
// event type definitions back into documents. Parsing and update logic live
// in core::pattern; this module only does the I/O around them.

use crate::core::hooks::HookLibrary;
use crate::core::pattern::{self, EventType, EventTypeDefinition, EventTypeRegistry};
use crate::util::constants;
use crate::util::error::PatternError;
use std::path::Path;

/// Read a pattern document, enforcing the size limit.
fn read_document(path: &Path) -> Result<String, PatternError> {
    let io_error = |source| PatternError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_error)?.len();
    if size > constants::MAX_PATTERN_FILE_SIZE {
        return Err(PatternError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            max_size: constants::MAX_PATTERN_FILE_SIZE,
        });
    }
    std::fs::read_to_string(path).map_err(io_error)
}

/// Load every document in order into one registry. A definition replaces an
/// earlier one with the same name. Any error is fatal.
pub fn load_pattern_files<P: AsRef<Path>>(
    paths: &[P],
    library: &HookLibrary,
) -> Result<EventTypeRegistry, PatternError> {
    let mut registry = EventTypeRegistry::new();
    for path in paths {
        let path = path.as_ref();
        let xml = read_document(path)?;
        let types = pattern::compile_document(&xml, path, library)?;
        tracing::info!(
            path = %path.display(),
            count = types.len(),
            "Loaded pattern document"
        );
        for event_type in types {
            registry.insert(event_type);
        }
    }
    Ok(registry)
}

/// Add a definition compiled on its own (e.g. from command-line options).
pub fn add_definition(
    registry: &mut EventTypeRegistry,
    def: &EventTypeDefinition,
    library: &HookLibrary,
) -> Result<(), PatternError> {
    registry.insert(EventType::compile(def, library)?);
    Ok(())
}

/// Insert or replace `def` in the document at `path`, creating the file if
/// it does not exist. The definition is compiled first so that an invalid
/// one is never written.
pub fn save_event_type(
    path: &Path,
    def: &EventTypeDefinition,
    library: &HookLibrary,
) -> Result<(), PatternError> {
    EventType::compile(def, library)?;
    let existing = if path.exists() {
        read_document(path)?
    } else {
        String::new()
    };
    let updated = pattern::upsert_definition(&existing, def, path)?;
    std::fs::write(path, updated).map_err(|source| PatternError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %path.display(),
        event_type = def.effective_name(),
        "Event type saved"
    );
    Ok(())
}
