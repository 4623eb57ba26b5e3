// LogTrawl - core/discovery.rs
//
// Recursive discovery of log files in directories and nested archives.
//
// Every candidate is identified by its pseudo-path: the forward-slash path of
// the file, prefixed by the pseudo-paths of all archives containing it. The
// path filter is matched anchored at the start of that pseudo-path. Files
// that fail the filter but carry an archive extension are probed as tar, then
// zip, and recursed into; anything that is neither is skipped quietly.
//
// Per-file I/O errors are non-fatal and collected as warnings. Archive
// nesting is bounded by `max_archive_depth`.

use crate::core::archive::{self, Blob, ContentHandle};
use crate::core::model::{DiscoveredFile, LogSource, SourceKind};
use crate::platform::fs::system_time_to_local;
use crate::util::constants;
use crate::util::error::DiscoveryError;
use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a discovery operation.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Regex matched case-insensitively at the start of each pseudo-path.
    pub path_filter: String,

    /// `;`-separated file name suffixes that mark candidate archives.
    pub archive_extensions: String,

    /// Maximum number of archives nested inside each other.
    pub max_archive_depth: usize,

    /// Optional cancel flag, checked between entries. Discovery stops early
    /// and returns what it found so far.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            path_filter: constants::DEFAULT_PATH_FILTER.to_string(),
            archive_extensions: constants::DEFAULT_ARCHIVE_EXTENSIONS.to_string(),
            max_archive_depth: constants::DEFAULT_MAX_ARCHIVE_DEPTH,
            cancel_flag: None,
        }
    }
}

/// Compile a path filter: anchored at the start, case-insensitive.
pub fn compile_path_filter(pattern: &str) -> Result<Regex, DiscoveryError> {
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .build()
        .map_err(|source| DiscoveryError::InvalidPathFilter {
            pattern: pattern.to_string(),
            source,
        })
}

/// Compile a `;`-separated extension list into a suffix regex. Returns
/// `None` when the list is empty, which disables archive probing.
pub fn compile_archive_extensions(extensions: &str) -> Result<Option<Regex>, DiscoveryError> {
    let alternatives: Vec<String> = extensions
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(&format!("(?:{})$", alternatives.join("|")))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|source| DiscoveryError::InvalidArchiveExtensions {
            extensions: extensions.to_string(),
            source,
        })
}

/// Replace host separators with `/`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Pseudo-path of an archive member.
fn join_pseudo(parent: &str, name: &str) -> String {
    let name = normalize_path(name);
    let name = name.trim_start_matches("./");
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Discover log files under every root.
///
/// Returns the sources that registered at least one file, in the order they
/// were completed (nested archives before their containers), followed by the
/// aggregate of loose files named directly as roots. The second element holds
/// non-fatal warnings.
///
/// # Fatal errors
/// Only an invalid path filter or extension list returns `Err`.
pub fn discover(
    roots: &[PathBuf],
    config: &DiscoveryConfig,
) -> Result<(Vec<LogSource>, Vec<String>), DiscoveryError> {
    let mut walker = Walker {
        path_filter: compile_path_filter(&config.path_filter)?,
        archive_extensions: compile_archive_extensions(&config.archive_extensions)?,
        max_depth: config
            .max_archive_depth
            .min(constants::ABSOLUTE_MAX_ARCHIVE_DEPTH),
        cancel_flag: config.cancel_flag.clone(),
        sources: Vec::new(),
        loose: LogSource::new(SourceKind::Loose, ""),
        warnings: Vec::new(),
    };

    for root in roots {
        if walker.cancelled() {
            break;
        }
        let count = walker.scan_root(root);
        tracing::info!(root = %root.display(), files = count, "Scanned path");
    }

    let Walker {
        mut sources,
        loose,
        warnings,
        ..
    } = walker;
    if !loose.is_empty() {
        sources.push(loose);
    }

    tracing::info!(
        sources = sources.len(),
        files = sources.iter().map(LogSource::len).sum::<usize>(),
        warnings = warnings.len(),
        "Discovery complete"
    );
    Ok((sources, warnings))
}

struct Walker {
    path_filter: Regex,
    archive_extensions: Option<Regex>,
    max_depth: usize,
    cancel_flag: Option<Arc<AtomicBool>>,
    sources: Vec<LogSource>,
    loose: LogSource,
    warnings: Vec<String>,
}

impl Walker {
    fn cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn warn(&mut self, msg: String) {
        tracing::warn!("{}", msg);
        self.warnings.push(msg);
    }

    /// Named groups that took part in a path filter match, or `None`.
    fn match_path(&self, pseudo_path: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.path_filter.captures(pseudo_path)?;
        Some(
            self.path_filter
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    fn is_archive_name(&self, name: &str) -> bool {
        self.archive_extensions
            .as_ref()
            .is_some_and(|re| re.is_match(name))
    }

    fn keep(&mut self, source: LogSource) {
        if !source.is_empty() {
            tracing::debug!(source = %source, "Registered source");
            self.sources.push(source);
        }
    }

    fn scan_root(&mut self, root: &Path) -> usize {
        let meta = match std::fs::metadata(root) {
            Ok(meta) => meta,
            Err(e) => {
                self.warn(format!("Scan path '{}' is not accessible: {e}", root.display()));
                return 0;
            }
        };
        if meta.is_dir() {
            return self.scan_directory(root);
        }

        let pseudo_path = normalize_path(&root.to_string_lossy());
        if let Some(path_fields) = self.match_path(&pseudo_path) {
            self.loose.register(DiscoveredFile {
                path: root.to_string_lossy().into_owned(),
                pseudo_path,
                modified: modified_or_min(meta.modified().ok()),
                size: meta.len(),
                content: ContentHandle::Disk(root.to_path_buf()),
                path_fields,
            });
            1
        } else if self.is_archive_name(&pseudo_path) {
            self.scan_archive_file(root, &pseudo_path)
        } else {
            tracing::debug!(path = %pseudo_path, "Root matches neither path filter nor archive extensions");
            0
        }
    }

    fn scan_directory(&mut self, root: &Path) -> usize {
        let mut source = LogSource::new(
            SourceKind::Directory,
            normalize_path(&root.to_string_lossy()),
        );
        let mut count = 0;

        for entry in WalkDir::new(root).sort_by_file_name() {
            if self.cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    self.warn(format!("Cannot access '{path}': {e}"));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let pseudo_path = normalize_path(&path.to_string_lossy());
            if let Some(path_fields) = self.match_path(&pseudo_path) {
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        self.warn(format!("Cannot read metadata of '{}': {e}", path.display()));
                        continue;
                    }
                };
                source.register(DiscoveredFile {
                    path: path.to_string_lossy().into_owned(),
                    pseudo_path,
                    modified: modified_or_min(meta.modified().ok()),
                    size: meta.len(),
                    content: ContentHandle::Disk(path.to_path_buf()),
                    path_fields,
                });
                count += 1;
            } else if self.is_archive_name(&entry.file_name().to_string_lossy()) {
                count += self.scan_archive_file(path, &pseudo_path);
            }
        }

        self.keep(source);
        count
    }

    fn scan_archive_file(&mut self, path: &Path, pseudo_path: &str) -> usize {
        match Blob::map_file(path) {
            Ok(blob) => self.scan_archive(pseudo_path, &blob, 1),
            Err(e) => {
                self.warn(format!("Cannot open '{}': {e}", path.display()));
                0
            }
        }
    }

    /// Register the matching members of an archive and recurse into nested
    /// archives. Returns the number of files registered, nested ones included.
    fn scan_archive(&mut self, pseudo_path: &str, blob: &Blob, depth: usize) -> usize {
        if depth > self.max_depth {
            self.warn(format!(
                "Archive '{pseudo_path}' is nested deeper than {} levels; skipped",
                self.max_depth
            ));
            return 0;
        }

        let Some(opened) = archive::open_archive(blob) else {
            tracing::debug!(path = %pseudo_path, "Not a tar or zip archive; skipped");
            return 0;
        };
        tracing::debug!(
            path = %pseudo_path,
            kind = opened.kind.label(),
            entries = opened.entries.len(),
            "Opened archive"
        );

        let mut source = LogSource::new(opened.kind, pseudo_path);
        let mut added: HashSet<String> = HashSet::new();
        let mut count = 0;

        for entry in opened.entries {
            if self.cancelled() {
                break;
            }
            let member_path = join_pseudo(pseudo_path, &entry.name);
            match self.match_path(&member_path) {
                Some(path_fields) => {
                    if !added.insert(entry.name.clone()) {
                        tracing::debug!(path = %member_path, "Duplicate archive member ignored");
                        continue;
                    }
                    source.register(DiscoveredFile {
                        path: entry.name,
                        pseudo_path: member_path,
                        modified: entry.modified,
                        size: entry.size,
                        content: entry.content,
                        path_fields,
                    });
                    count += 1;
                }
                None if self.is_archive_name(&member_path) => match entry.content.to_blob() {
                    Ok(nested) => count += self.scan_archive(&member_path, &nested, depth + 1),
                    Err(e) => self.warn(format!("Cannot read '{member_path}': {e}")),
                },
                None => {}
            }
        }

        self.keep(source);
        count
    }
}

fn modified_or_min(t: Option<std::time::SystemTime>) -> NaiveDateTime {
    t.map(system_time_to_local).unwrap_or(NaiveDateTime::MIN)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn config(filter: &str) -> DiscoveryConfig {
        DiscoveryConfig {
            path_filter: filter.to_string(),
            ..DiscoveryConfig::default()
        }
    }

    fn all_pseudo_paths(sources: &[LogSource]) -> Vec<String> {
        sources
            .iter()
            .flat_map(|s| s.files.iter().map(|f| f.pseudo_path.clone()))
            .collect()
    }

    fn make_temp_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("app.log"), "2024-01-01 00:00:00 a\n").unwrap();
        fs::write(root.join("sub/other.log"), "x\n").unwrap();
        fs::write(root.join("notes.txt"), "not a log").unwrap();
        fs::write(root.join("junk.zip"), "definitely not a zip").unwrap();
        fs::write(
            root.join("bundle.tar"),
            tar_bytes(&[("inner/svc.log", b"svc\n"), ("readme.md", b"doc")]),
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_path_filter_is_anchored() {
        let re = compile_path_filter("a/b").unwrap();
        assert!(re.is_match("a/b/c.log"));
        assert!(!re.is_match("xa/b"));
        assert!(compile_path_filter("A/B").unwrap().is_match("a/b"));
    }

    #[test]
    fn test_archive_extension_regex() {
        let re = compile_archive_extensions(".zip; .tar.gz;;.TGZ").unwrap().unwrap();
        assert!(re.is_match("x/bundle.ZIP"));
        assert!(re.is_match("a.tar.gz"));
        assert!(re.is_match("a.tgz"));
        assert!(!re.is_match("a.zip.log"));
        assert!(!re.is_match("azip"));
        assert!(compile_archive_extensions(" ; ").unwrap().is_none());
    }

    #[test]
    fn test_invalid_path_filter() {
        let err = compile_path_filter("(unclosed").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidPathFilter { .. }));
    }

    #[test]
    fn test_join_pseudo() {
        assert_eq!(join_pseudo("a.zip", "dir\\x.log"), "a.zip/dir/x.log");
        assert_eq!(join_pseudo("a.zip/", "./x.log"), "a.zip/x.log");
        assert_eq!(join_pseudo("", "x.log"), "x.log");
    }

    #[test]
    fn test_discovers_directory_and_nested_tar() {
        let dir = make_temp_tree();
        let (sources, warnings) =
            discover(&[dir.path().to_path_buf()], &config(r".*\.log$")).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceKind::Tar);
        assert_eq!(sources[1].kind, SourceKind::Directory);

        let root = normalize_path(&dir.path().to_string_lossy());
        let paths = all_pseudo_paths(&sources);
        assert_eq!(
            paths,
            vec![
                format!("{root}/bundle.tar/inner/svc.log"),
                format!("{root}/app.log"),
                format!("{root}/sub/other.log"),
            ]
        );
        assert_eq!(sources[0].files[0].path, "inner/svc.log");
        assert!(paths.iter().all(|p| !p.contains('\\')));
    }

    #[test]
    fn test_path_fields_only_for_participating_groups() {
        let dir = make_temp_tree();
        let (sources, _) = discover(
            &[dir.path().to_path_buf()],
            &config(r".*?/(?P<sub>sub/)?(?P<name>[a-z]+)\.log$"),
        )
        .unwrap();
        let files: Vec<&DiscoveredFile> = sources.iter().flat_map(|s| s.files.iter()).collect();
        let app = files.iter().find(|f| f.file_name() == "app.log").unwrap();
        assert_eq!(app.path_fields.get("name").map(String::as_str), Some("app"));
        assert!(!app.path_fields.contains_key("sub"));
        let other = files.iter().find(|f| f.file_name() == "other.log").unwrap();
        assert_eq!(other.path_fields.get("sub").map(String::as_str), Some("sub/"));
    }

    #[test]
    fn test_loose_file_root_no_archive_probe() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("direct.log.zip");
        fs::write(&log, zip_bytes(&[("in.log", b"1\n")])).unwrap();
        // The filter matches the name itself, so it is a loose file.
        let (sources, _) = discover(&[log.clone()], &config(r".*\.log")).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::Loose);
        assert_eq!(sources[0].path, "");
        assert_eq!(sources[0].files[0].size, fs::metadata(&log).unwrap().len());
    }

    #[test]
    fn test_archive_root_and_duplicate_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dup.tar");
        fs::write(
            &archive,
            tar_bytes(&[("x.log", b"first"), ("x.log", b"second")]),
        )
        .unwrap();
        let (sources, _) = discover(&[archive], &config(r".*\.log$")).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].len(), 1);
    }

    #[test]
    fn test_missing_root_is_a_warning() {
        let (sources, warnings) = discover(
            &[PathBuf::from("/definitely/not/here")],
            &DiscoveryConfig::default(),
        )
        .unwrap();
        assert!(sources.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let inner = tar_bytes(&[("deep.log", b"d")]);
        let middle = tar_bytes(&[("inner.tar", inner.as_slice())]);
        let dir = tempfile::tempdir().unwrap();
        let outer = dir.path().join("outer.tar");
        fs::write(&outer, tar_bytes(&[("middle.tar", middle.as_slice())])).unwrap();

        let mut cfg = config(r".*\.log$");
        cfg.max_archive_depth = 2;
        let (sources, warnings) = discover(&[outer.clone()], &cfg).unwrap();
        assert!(sources.is_empty());
        assert_eq!(warnings.len(), 1);

        cfg.max_archive_depth = 3;
        let (sources, _) = discover(&[outer], &cfg).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].files[0]
            .pseudo_path
            .ends_with("outer.tar/middle.tar/inner.tar/deep.log"));
    }

    #[test]
    fn test_cancel_flag_stops_discovery() {
        let dir = make_temp_tree();
        let flag = Arc::new(AtomicBool::new(true));
        let mut cfg = config(r".*\.log$");
        cfg.cancel_flag = Some(flag);
        let (sources, _) = discover(&[dir.path().to_path_buf()], &cfg).unwrap();
        assert!(sources.is_empty());
    }
}
