// LogTrawl - tests/e2e_search.rs
//
// End-to-end tests for the search pipeline: pattern documents loaded from
// disk, discovery over real archives, the match state machine, hooks,
// cross-event lookups, chronological ordering and export.

use logtrawl::app::pattern_mgr;
use logtrawl::app::session::{SearchOptions, SearchSession};
use logtrawl::core::discovery::{discover, DiscoveryConfig};
use logtrawl::core::hooks::HookLibrary;
use logtrawl::core::model::Event;
use logtrawl::core::pattern::{EventTypeDefinition, EventTypeRegistry};
use logtrawl::core::store::{Before, Query};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

const AUTH_PATTERNS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Patterns>
  <EventType>
    <Name>LOGIN</Name>
    <Description>User login</Description>
    <RexText><![CDATA[login user=(?P<user>\w+) code=(?P<code>\w+)]]></RexText>
    <DisplayOnMatch>login {user}</DisplayOnMatch>
  </EventType>
  <EventType>
    <Name>ACCESS</Name>
    <RexText><![CDATA[access account=(?P<account>\w+)]]></RexText>
    <DisplayOnMatch>{account} code {code@LOGIN:user=account}</DisplayOnMatch>
  </EventType>
</Patterns>
"#;

fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
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

fn write_patterns(dir: &Path, xml: &str) -> PathBuf {
    let path = dir.join("patterns.xml");
    fs::write(&path, xml).unwrap();
    path
}

fn load(path: &Path) -> EventTypeRegistry {
    pattern_mgr::load_pattern_files(&[path], &HookLibrary::default()).unwrap()
}

/// deep.log (inside the nested tar) holds the ACCESS at 10:00 and app.log the
/// LOGIN at 09:00. The nested tar is scanned first, so traversal order is the
/// reverse of time order.
fn write_auth_bundle(dir: &Path) -> PathBuf {
    let logs = dir.join("logs");
    fs::create_dir(&logs).unwrap();
    let inner = tar_bytes(&[("deep.log", b"2024-01-02 10:00:00 access account=bob\n")]);
    let outer = zip_bytes(&[
        ("app.log", b"2024-01-02 09:00:00 login user=bob code=K7\n"),
        ("inner.tar", &inner),
    ]);
    fs::write(logs.join("bundle.zip"), outer).unwrap();
    logs
}

/// Discover `root`, run a full search and collect the printed lines.
fn run_search(
    root: &Path,
    registry: EventTypeRegistry,
    options: SearchOptions,
) -> (SearchSession, Vec<String>) {
    let (sources, _) = discover(&[root.to_path_buf()], &DiscoveryConfig::default()).unwrap();
    let mut session = SearchSession::new(registry, options).unwrap();
    let mut lines = Vec::new();
    let mut sink = |line: &str| lines.push(line.to_string());
    session.search_sources(&sources, &mut sink).unwrap();
    session.wrapup(&mut sink).unwrap();
    (session, lines)
}

fn field(event: &Event, name: &str) -> Option<String> {
    event.get_field(name).flatten()
}

// =============================================================================
// Cross-archive correlation
// =============================================================================

#[test]
fn e2e_chronological_search_correlates_across_archives() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(dir.path(), AUTH_PATTERNS));
    let root = write_auth_bundle(dir.path());

    let (session, lines) = run_search(
        &root,
        registry,
        SearchOptions {
            chronological: true,
            ..SearchOptions::default()
        },
    );

    assert_eq!(
        lines,
        vec![
            "2024-01-02T09:00:00 login bob",
            "2024-01-02T10:00:00 bob code K7",
        ]
    );

    // Sorted and renumbered 0..N-1.
    let store = session.store();
    let order: Vec<(String, u64)> = store
        .iter()
        .map(|e| (e.event_type().to_string(), e.sequence_number()))
        .collect();
    assert_eq!(
        order,
        vec![("LOGIN".to_string(), 0), ("ACCESS".to_string(), 1)]
    );

    let access = store.get_event(Query::of_type("ACCESS")).unwrap();
    assert!(field(access, "_source_path")
        .unwrap()
        .ends_with("bundle.zip/inner.tar/deep.log"));
}

#[test]
fn e2e_traversal_order_search_finds_no_earlier_login() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(dir.path(), AUTH_PATTERNS));
    let root = write_auth_bundle(dir.path());

    let (_, lines) = run_search(
        &root,
        registry,
        SearchOptions {
            hide_timestamp: true,
            ..SearchOptions::default()
        },
    );
    assert_eq!(lines, vec!["bob code NO MATCHING EVENT", "login bob"]);
}

#[test]
fn e2e_query_before_excludes_reference_and_later_events() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(dir.path(), AUTH_PATTERNS));
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(
        logs.join("auth.log"),
        "2024-01-02 08:00:00 login user=ann code=A\n\
         2024-01-02 08:05:00 login user=bob code=B\n\
         2024-01-02 08:10:00 access account=bob\n\
         2024-01-02 08:15:00 login user=cid code=C\n",
    )
    .unwrap();

    let (session, _) = run_search(&logs, registry, SearchOptions::default());
    let store = session.store();
    let access = store.get_event(Query::of_type("ACCESS")).unwrap();
    let reference = access.sequence_number();

    let earlier: Vec<&Event> = store.query(Query::new().before(Before::event(access))).collect();
    assert_eq!(earlier.len(), 2);
    assert!(earlier.iter().all(|e| e.sequence_number() < reference));
    assert_eq!(field(earlier[0], "user").as_deref(), Some("bob"));

    let limited: Vec<&Event> = store
        .query(Query::of_type("LOGIN").field("user", "cid").limit(1))
        .collect();
    assert_eq!(limited.len(), 1);
}

// =============================================================================
// Multiline events
// =============================================================================

#[test]
fn e2e_multiline_event_spans_two_lines() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(
        dir.path(),
        r#"<Patterns>
  <EventType>
    <Name>ERR</Name>
    <RexText><![CDATA[^ERROR (?P<what>\w+)$\n^.*continuation]]></RexText>
    <MultilineCount>2</MultilineCount>
    <DisplayOnMatch>{what} at line {_line_number}</DisplayOnMatch>
  </EventType>
</Patterns>"#,
    ));
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(
        logs.join("service.log"),
        "ERROR start\n2024-01-02 10:00:00 continuation\n2024-01-02 10:00:01 other\n",
    )
    .unwrap();

    let (session, lines) = run_search(
        &logs,
        registry,
        SearchOptions {
            hide_timestamp: true,
            ..SearchOptions::default()
        },
    );
    assert_eq!(lines, vec!["start at line 1"]);

    let event = session.store().iter().next().unwrap();
    assert_eq!(event.raw(), "ERROR start\n2024-01-02 10:00:00 continuation");
    assert_eq!(event.line_number(), 1);
    assert_eq!(event.timestamp().to_string(), "2024-01-02 10:00:00");
}

// =============================================================================
// Hooks
// =============================================================================

#[test]
fn e2e_match_hook_deletions_hide_events() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(
        dir.path(),
        r#"<Patterns>
  <EventType>
    <Name>STATE</Name>
    <RexText><![CDATA[link (?P<state>\w+)]]></RexText>
    <DisplayOnMatch>link {state}</DisplayOnMatch>
    <ExecOnMatch><![CDATA[
# drop repeats of the previous state
delete_if_unchanged
]]></ExecOnMatch>
  </EventType>
</Patterns>"#,
    ));
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(
        logs.join("net.log"),
        "2024-01-02 10:00:00 link up\n\
         2024-01-02 10:00:01 link up\n\
         2024-01-02 10:00:02 link down\n\
         2024-01-02 10:00:03 link down\n",
    )
    .unwrap();

    let (session, lines) = run_search(
        &logs,
        registry,
        SearchOptions {
            chronological: true,
            hide_timestamp: true,
            ..SearchOptions::default()
        },
    );
    assert_eq!(lines, vec!["link up", "link down"]);

    let store = session.store();
    assert_eq!(store.len(), 2);
    let states: Vec<Option<String>> = store
        .query(Query::of_type("STATE"))
        .map(|e| field(e, "state"))
        .collect();
    assert_eq!(states, vec![Some("down".into()), Some("up".into())]);
    assert!(store.iter().all(|e| e.display().is_some()));
    assert_eq!(session.stats().events_found, 4);
}

#[test]
fn e2e_match_hook_sets_fields_before_display() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(
        dir.path(),
        r#"<Patterns>
  <EventType>
    <Name>LOGIN</Name>
    <RexText><![CDATA[login user=(?P<user>\w+)]]></RexText>
    <Immediate>true</Immediate>
    <DisplayOnMatch>{who}</DisplayOnMatch>
    <ExecOnMatch><![CDATA[set_field who = {user}@{_source_filename}]]></ExecOnMatch>
  </EventType>
</Patterns>"#,
    ));
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(logs.join("host1.log"), "2024-01-02 10:00:00 login user=bob\n").unwrap();

    let (_, lines) = run_search(
        &logs,
        registry,
        SearchOptions {
            hide_timestamp: true,
            ..SearchOptions::default()
        },
    );
    assert_eq!(lines, vec!["bob@host1.log"]);
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn e2e_export_writes_files_for_every_type() {
    let dir = TempDir::new().unwrap();
    let registry = load(&write_patterns(
        dir.path(),
        r#"<Patterns>
  <EventType>
    <Name>LOGIN</Name>
    <RexText><![CDATA[login user=(?P<user>\w+)]]></RexText>
    <DisplayOnMatch>{user}</DisplayOnMatch>
  </EventType>
  <EventType>
    <Name>NEVER</Name>
    <RexText><![CDATA[this never appears]]></RexText>
  </EventType>
</Patterns>"#,
    ));
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(logs.join("a.log"), "2024-01-02 10:00:00 login user=bob;x\n").unwrap();
    let out = dir.path().join("out");

    let (session, _) = run_search(
        &logs,
        registry,
        SearchOptions {
            output_dir: Some(out.clone()),
            ..SearchOptions::default()
        },
    );
    assert_eq!(session.stats().events_exported, 1);

    for name in ["LOGIN", "NEVER"] {
        for ext in ["xml", "full.xml", "csv"] {
            assert!(out.join(format!("{name}.{ext}")).exists(), "{name}.{ext}");
        }
    }

    let never = fs::read_to_string(out.join("NEVER.csv")).unwrap();
    assert_eq!(never.lines().count(), 1);
    assert!(never.starts_with("_timestamp;"));

    let login = fs::read_to_string(out.join("LOGIN.csv")).unwrap();
    let rows: Vec<&str> = login.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].ends_with(";user;"), "{}", rows[0]);
    assert!(rows[1].starts_with("2024-01-02"), "{}", rows[1]);
    assert!(rows[1].ends_with(";bob;"), "{}", rows[1]);

    let full = fs::read_to_string(out.join("LOGIN.full.xml")).unwrap();
    assert!(full.contains("<![CDATA[bob]]>"), "{full}");
}

// =============================================================================
// Pattern documents
// =============================================================================

#[test]
fn e2e_save_event_type_preserves_other_blocks() {
    let dir = TempDir::new().unwrap();
    let first_block = r#"<EventType>
    <!-- keep this comment -->
    <Name>FIRST</Name>
    <RexText><![CDATA[a & b]]></RexText>
  </EventType>"#;
    let original = format!(
        "<Patterns>\n  {first_block}\n  <EventType>\n    <Name>SECOND</Name>\n  </EventType>\n</Patterns>\n"
    );
    let path = write_patterns(dir.path(), &original);
    let lib = HookLibrary::default();

    let def = EventTypeDefinition {
        name: Some("SECOND".into()),
        description: Some("replaced".into()),
        rex_text: Some(r"x (?P<y>\d+)".into()),
        ..EventTypeDefinition::default()
    };
    pattern_mgr::save_event_type(&path, &def, &lib).unwrap();
    let third = EventTypeDefinition {
        name: Some("THIRD".into()),
        ..EventTypeDefinition::default()
    };
    pattern_mgr::save_event_type(&path, &third, &lib).unwrap();

    let updated = fs::read_to_string(&path).unwrap();
    assert!(updated.contains(first_block), "{updated}");
    assert_eq!(updated.matches("<Name>SECOND</Name>").count(), 1);

    let registry = load(&path);
    assert_eq!(
        registry.names().collect::<Vec<_>>(),
        vec!["FIRST", "SECOND", "THIRD"]
    );
    assert_eq!(registry.get("SECOND").unwrap().description, "replaced");
}
