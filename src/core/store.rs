// LogTrawl - core/store.rs
//
// Event store and query engine.
//
// Events live in a slab keyed by a stable `EventId`. Two ordered indices
// reference them: the flat insertion (later: chronological) sequence, and
// one list per event type. Deletion removes an event from both. Queries walk
// an index from newest to oldest and are lazy.

use crate::core::model::{Event, EventId};
use crate::core::pattern::EventTypeRegistry;
use crate::core::template;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Queries
// =============================================================================

/// Upper bound of a backward lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Before {
    /// Only events with a strictly earlier timestamp.
    Timestamp(NaiveDateTime),
    /// Only events with a strictly lower sequence number.
    Sequence(u64),
}

impl Before {
    /// Everything stored before `event`, by sequence number.
    pub fn event(event: &Event) -> Self {
        Self::Sequence(event.sequence_number())
    }

    fn admits(self, event: &Event) -> bool {
        match self {
            Self::Timestamp(t) => event.timestamp() < t,
            Self::Sequence(seq) => event.sequence_number() < seq,
        }
    }
}

/// Criteria of a backward lookup. All given criteria must hold.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub name: Option<String>,
    /// Stored (system or user) fields and the values they must equal.
    pub fields: Vec<(String, Option<String>)>,
    pub before: Option<Before>,
    /// Stop after this many results; 0 means unlimited.
    pub limit: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), Some(value.into())));
        self
    }

    pub fn field_value(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn before(mut self, before: Before) -> Self {
        self.before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.name.as_deref().is_some_and(|n| n != event.event_type()) {
            return false;
        }
        if self.before.is_some_and(|b| !b.admits(event)) {
            return false;
        }
        self.fields
            .iter()
            .all(|(name, value)| event.stored_field(name).as_ref() == Some(value))
    }
}

/// Lazy newest-to-oldest query results.
pub struct QueryIter<'a> {
    store: &'a EventStore,
    ids: std::iter::Rev<std::slice::Iter<'a, EventId>>,
    query: Query,
    remaining: Option<usize>,
}

impl<'a> Iterator for QueryIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<&'a Event> {
        if self.remaining == Some(0) {
            return None;
        }
        let store = self.store;
        let query = &self.query;
        let found = self
            .ids
            .by_ref()
            .filter_map(|id| store.events.get(id))
            .find(|event| query.matches(event))?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(found)
    }
}

/// Total order used by the chronological sort. Sequence numbers are unique
/// within a store, so two events never compare equal in practice; if they
/// did, they are treated as equal and the stable sort keeps their order.
pub fn chronological_order(a: &Event, b: &Event) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| a.sequence_number().cmp(&b.sequence_number()))
}

// =============================================================================
// Store
// =============================================================================

/// All events of one search run.
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<EventId, Event>,
    sequence: Vec<EventId>,
    by_type: BTreeMap<String, Vec<EventId>>,
    next_id: u64,
    next_sequence: u64,
}

impl EventStore {
    /// Create a store knowing the given event type names. Lookups against
    /// unknown type names are reported differently from empty ones.
    pub fn new<I, S>(type_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by_type: type_names
                .into_iter()
                .map(|n| (n.into(), Vec::new()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.by_type.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Store an event, assigning its id and the next sequence number.
    pub fn insert(&mut self, mut event: Event) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        event.id = id;
        event.set_sequence_number(self.next_sequence);
        self.next_sequence += 1;

        self.by_type
            .entry(event.event_type().to_string())
            .or_default()
            .push(id);
        self.sequence.push(id);
        self.events.insert(id, event);
        id
    }

    /// Remove an event from every index. Returns false if it was already gone.
    pub fn delete(&mut self, id: EventId) -> bool {
        let Some(event) = self.events.remove(&id) else {
            return false;
        };
        if let Some(pos) = self.sequence.iter().rposition(|x| *x == id) {
            self.sequence.remove(pos);
        }
        if let Some(list) = self.by_type.get_mut(event.event_type()) {
            if let Some(pos) = list.iter().rposition(|x| *x == id) {
                list.remove(pos);
            }
        }
        tracing::trace!(event = %event, "Event deleted");
        true
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn get_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.events.get_mut(&id)
    }

    /// Ids in sequence order.
    pub fn sequence(&self) -> &[EventId] {
        &self.sequence
    }

    /// Events in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.sequence.iter().filter_map(|id| self.events.get(id))
    }

    /// Ids of one type in order; empty for unknown types.
    pub fn ids_of_type(&self, name: &str) -> &[EventId] {
        self.by_type.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn events_of_type<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Event> + 'a {
        let ids = self.ids_of_type(name);
        ids.iter().filter_map(|id| self.events.get(id))
    }

    /// Walk the type list (when `name` is given) or the flat list from newest
    /// to oldest, yielding events that satisfy every criterion.
    pub fn query(&self, query: Query) -> QueryIter<'_> {
        let ids: &[EventId] = match &query.name {
            Some(name) => self.ids_of_type(name),
            None => &self.sequence,
        };
        QueryIter {
            store: self,
            ids: ids.iter().rev(),
            remaining: (query.limit > 0).then_some(query.limit),
            query,
        }
    }

    /// First result of the query with a limit of one.
    pub fn get_event(&self, query: Query) -> Option<&Event> {
        self.query(query.limit(1)).next()
    }

    /// The event of the same type immediately before `id`.
    pub fn predecessor_of_type(&self, id: EventId) -> Option<&Event> {
        let event = self.events.get(&id)?;
        let list = self.by_type.get(event.event_type())?;
        let pos = list.iter().rposition(|x| *x == id)?;
        list[..pos]
            .iter()
            .rev()
            .find_map(|prev| self.events.get(prev))
    }

    /// Stable sort of every index by (timestamp, sequence number), then
    /// renumber sequence numbers 0..N-1 in the new order.
    pub fn chronological_sort(&mut self) {
        let events = &self.events;
        let order = |a: &EventId, b: &EventId| match (events.get(a), events.get(b)) {
            (Some(a), Some(b)) => chronological_order(a, b),
            _ => Ordering::Equal,
        };
        self.sequence.sort_by(order);
        for list in self.by_type.values_mut() {
            list.sort_by(order);
        }

        for (seq, id) in self.sequence.iter().enumerate() {
            if let Some(event) = self.events.get_mut(id) {
                event.set_sequence_number(seq as u64);
            }
        }
        self.next_sequence = self.sequence.len() as u64;
        tracing::debug!(events = self.sequence.len(), "Events sorted chronologically");
    }

    /// Compute changed fields against the type predecessor and render the
    /// display template of one event.
    pub fn refresh_display(&mut self, id: EventId, registry: &EventTypeRegistry) {
        let previous = self.predecessor_of_type(id).map(Event::id);
        self.render_display(id, previous, registry);
    }

    fn render_display(
        &mut self,
        id: EventId,
        previous: Option<EventId>,
        registry: &EventTypeRegistry,
    ) {
        let changed = match self.events.get(&id) {
            Some(event) => event.changed_since(previous.and_then(|p| self.events.get(&p))),
            None => return,
        };
        let Some(event) = self.events.get_mut(&id) else {
            return;
        };
        event.set_changed_fields(changed);

        let Some(event) = self.events.get(&id) else {
            return;
        };
        let display = registry
            .get(event.event_type())
            .and_then(|et| et.display_on_match.as_deref())
            .map(|t| template::render(t, event, self));
        if let Some(event) = self.events.get_mut(&id) {
            event.set_display(display);
        }
    }

    /// End-of-run finalization of deferred events.
    ///
    /// First every non-immediate event still present receives its Match hook
    /// through `invoke_match`, in sequence order; events deleted meanwhile are
    /// skipped. Then, per type, each event gets its changed fields relative
    /// to its predecessor and its display string.
    pub fn finalize_display<E, F>(
        &mut self,
        registry: &EventTypeRegistry,
        mut invoke_match: F,
    ) -> Result<(), E>
    where
        F: FnMut(&mut EventStore, EventId) -> Result<(), E>,
    {
        let snapshot = self.sequence.clone();
        for id in snapshot {
            let deferred = self
                .events
                .get(&id)
                .and_then(|e| registry.get(e.event_type()))
                .is_some_and(|et| !et.immediate);
            if deferred {
                invoke_match(self, id)?;
            }
        }

        let lists: Vec<Vec<EventId>> = self.by_type.values().cloned().collect();
        for list in lists {
            let mut previous = None;
            for id in list {
                if !self.contains(id) {
                    continue;
                }
                self.render_display(id, previous, registry);
                previous = Some(id);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
