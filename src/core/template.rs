// LogTrawl - core/template.rs
//
// Field templates: `{field}`, `{field@TYPE}` and
// `{field@TYPE:reffield=condfield}` placeholders resolved against the
// current event and earlier events in the store. Resolution never fails;
// an unresolvable placeholder renders as a diagnostic text.

use crate::core::model::Event;
use crate::core::store::{Before, EventStore, Query};
use crate::util::constants;

/// Replace the literal escape sequences `\t` and `\n` with tab and newline.
pub fn expand_escapes(text: &str) -> String {
    text.replace(r"\t", "\t").replace(r"\n", "\n")
}

/// Render `template` for `current`.
pub fn render(template: &str, current: &Event, store: &EventStore) -> String {
    let text = expand_escapes(template);
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' && !after[..close].is_empty() => {
                out.push_str(&resolve(after[..close].trim(), current, store));
                rest = &after[close + 1..];
            }
            // `{}` stays literal.
            Some(close) if after.as_bytes()[close] == b'}' => {
                out.push_str("{}");
                rest = &after[close + 1..];
            }
            // A nested `{` turns the earlier one into plain text.
            Some(close) => {
                out.push('{');
                out.push_str(&after[..close]);
                rest = &after[close..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn value_text(value: Option<String>) -> String {
    value.unwrap_or_else(|| constants::NOT_AVAILABLE.to_string())
}

/// Resolve the text between braces.
fn resolve(placeholder: &str, current: &Event, store: &EventStore) -> String {
    let Some((field, reference)) = placeholder.split_once('@') else {
        return match current.get_field(placeholder) {
            Some(value) => value_text(value),
            None => format!("FIELD '{placeholder}' NOT FOUND"),
        };
    };

    let (type_name, condition) = match reference.split_once(':') {
        Some((t, c)) => (t, Some(c.trim())),
        None => (reference, None),
    };
    if !store.has_type(type_name) {
        return format!("EVENT TYPE '{type_name}' NOT FOUND");
    }

    let mut query = Query::of_type(type_name).before(Before::Sequence(current.sequence_number()));
    // A `:` always introduces a condition, even an empty one.
    if let Some(condition) = condition {
        let Some((ref_field, cond_field)) = condition.split_once('=') else {
            return format!("LOOKUP CONDITION '{condition}' NOT VALID");
        };
        let (ref_field, cond_field) = (ref_field.trim(), cond_field.trim());
        let Some(value) = current.get_field(cond_field) else {
            return format!("COMPARISON FIELD '{cond_field}' NOT FOUND");
        };
        query = query.field_value(ref_field, value);
    }

    match store.get_event(query) {
        None => constants::NO_MATCHING_EVENT.to_string(),
        Some(found) => match found.get_field(field) {
            Some(value) => value_text(value),
            None => format!("FIELD '{field}' NOT IN FOUND EVENT"),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EventId;
    use chrono::NaiveDate;

    fn login(store: &mut EventStore, user: &str, code: &str) -> EventId {
        let mut ev = Event::new("LOGIN", "N/A", "auth.log", "auth.log");
        ev.set_timestamp(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .unwrap(),
        );
        ev.capture_field("user", Some(user.to_string()));
        ev.capture_field("code", Some(code.to_string()));
        store.insert(ev)
    }

    fn access(store: &mut EventStore, account: &str) -> EventId {
        let mut ev = Event::new("ACCESS", "N/A", "app.log", "app.log");
        ev.set_raw("GET /index account=bob".to_string(), 12, 0..0);
        ev.capture_field("account", Some(account.to_string()));
        ev.capture_field("status", None);
        store.insert(ev)
    }

    #[test]
    fn test_expand_escapes() {
        assert_eq!(expand_escapes(r"a\tb\nc"), "a\tb\nc");
    }

    #[test]
    fn test_local_fields() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        assert_eq!(
            render(r"{account}\t{_line_number} {status}", ev, &store),
            "bob\t12 N/A"
        );
        assert_eq!(render("{nope}", ev, &store), "FIELD 'nope' NOT FOUND");
        assert_eq!(render("{_flat}", ev, &store), "GET /index account=bob");
    }

    #[test]
    fn test_literal_braces() {
        let mut store = EventStore::new(["ACCESS"]);
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        assert_eq!(render("{} {a{account} {open", ev, &store), "{} {abob {open");
        assert_eq!(render("{ account }", ev, &store), "bob");
    }

    #[test]
    fn test_lookup_with_condition() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        login(&mut store, "bob", "A1");
        login(&mut store, "eve", "E1");
        login(&mut store, "bob", "B2");
        let id = access(&mut store, "bob");
        login(&mut store, "bob", "LATER");

        let ev = store.get(id).unwrap();
        assert_eq!(render("{code@LOGIN:user=account}", ev, &store), "B2");
        assert_eq!(render("{code@LOGIN}", ev, &store), "B2");

        let other = access(&mut store, "mallory");
        let ev = store.get(other).unwrap();
        assert_eq!(
            render("{code@LOGIN:user=account}", ev, &store),
            "NO MATCHING EVENT"
        );
    }

    #[test]
    fn test_lookup_diagnostics() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        let first = access(&mut store, "bob");
        login(&mut store, "bob", "A1");
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();

        assert_eq!(render("{x@NOPE}", ev, &store), "EVENT TYPE 'NOPE' NOT FOUND");
        assert_eq!(
            render("{code@LOGIN:user}", ev, &store),
            "LOOKUP CONDITION 'user' NOT VALID"
        );
        assert_eq!(
            render("{code@LOGIN:user=missing}", ev, &store),
            "COMPARISON FIELD 'missing' NOT FOUND"
        );
        assert_eq!(
            render("{missing@LOGIN:user=account}", ev, &store),
            "FIELD 'missing' NOT IN FOUND EVENT"
        );
        assert_eq!(
            render("{code@LOGIN:}", ev, &store),
            "LOOKUP CONDITION '' NOT VALID"
        );

        let ev = store.get(first).unwrap();
        assert_eq!(render("{code@LOGIN}", ev, &store), "NO MATCHING EVENT");
    }

    #[test]
    fn test_comparison_field_missing_on_current_event() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        login(&mut store, "bob", "A1");
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        // `user` exists on LOGIN but not on the ACCESS event being rendered.
        assert_eq!(
            render("{code@LOGIN:user=user}", ev, &store),
            "COMPARISON FIELD 'user' NOT FOUND"
        );
    }

    #[test]
    fn test_condition_without_matching_event() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        login(&mut store, "eve", "E1");
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        assert_eq!(
            render("{code@LOGIN:user=account}", ev, &store),
            "NO MATCHING EVENT"
        );
        // Events of the type after the current one are never considered.
        login(&mut store, "bob", "LATER");
        let ev = store.get(id).unwrap();
        assert_eq!(
            render("{code@LOGIN:user=account}", ev, &store),
            "NO MATCHING EVENT"
        );
    }

    #[test]
    fn test_reference_field_missing_on_candidates() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        login(&mut store, "bob", "A1");
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        assert_eq!(
            render("{code@LOGIN:host=account}", ev, &store),
            "NO MATCHING EVENT"
        );
    }

    #[test]
    fn test_empty_condition_is_invalid() {
        let mut store = EventStore::new(["LOGIN", "ACCESS"]);
        login(&mut store, "bob", "A1");
        let id = access(&mut store, "bob");
        let ev = store.get(id).unwrap();
        assert_eq!(
            render("{code@LOGIN:}", ev, &store),
            "LOOKUP CONDITION '' NOT VALID"
        );
        assert_eq!(
            render("{code@LOGIN: }", ev, &store),
            "LOOKUP CONDITION '' NOT VALID"
        );
    }

    #[test]
    fn test_lookup_none_value_matches_none() {
        let mut store = EventStore::new(["ACCESS"]);
        let earlier = access(&mut store, "bob");
        let id = access(&mut store, "eve");
        let ev = store.get(id).unwrap();
        // `status` is present without a value on both events.
        assert_eq!(
            render("{account@ACCESS:status=status}", ev, &store),
            store
                .get(earlier)
                .unwrap()
                .get_field("account")
                .unwrap()
                .unwrap()
        );
    }
}
