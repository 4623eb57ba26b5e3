// LogTrawl - core/scanner.rs
//
// Per-file multiline match state machine.
//
// A `FileScan` is fed one line at a time, then one end-of-stream marker,
// and returns the events finalized by each input in order. It never touches
// the event store: the caller inserts returned events in the order given.
//
// Events whose timestamp was found are held back ("unfinished") until a
// later line matches the type's timestamp regex or the stream ends, so that
// continuation lines end up in their raw text.

use crate::core::model::{base_name, Event};
use crate::core::pattern::EventType;
use crate::core::timestamp::derive_timestamp;
use crate::util::constants;
use chrono::{Datelike, NaiveDateTime};
use std::collections::VecDeque;
use std::ops::Range;

/// One input of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanInput<'l> {
    Line(&'l str),
    EndOfStream,
}

/// An event waiting for the line that ends it.
#[derive(Debug)]
struct Pending {
    event: Event,
    /// Number of backlog lines belonging to the event so far.
    span: usize,
    /// Index of the timestamp line among the event's lines, oldest first,
    /// and the match range within that line.
    timestamp_at: Option<(usize, Range<usize>)>,
}

/// Scan state of one source file.
pub struct FileScan<'r> {
    types: Vec<&'r EventType>,
    /// Most recent lines, newest at the back.
    backlog: VecDeque<String>,
    /// Parallel to `types`: at most one unfinished event per type.
    unfinished: Vec<Option<Pending>>,
    lines_read: u64,
    source_path: String,
    source_filename: String,
    fallback_year: i32,
    wait_for_boundary: bool,
}

impl<'r> FileScan<'r> {
    /// Start scanning `source_path` for the given event types. `modified`
    /// supplies the year for timestamps that carry none.
    pub fn new(
        types: Vec<&'r EventType>,
        source_path: &str,
        modified: NaiveDateTime,
        wait_for_boundary: bool,
    ) -> Self {
        let unfinished = types.iter().map(|_| None).collect();
        Self {
            types,
            backlog: VecDeque::with_capacity(constants::BACKLOG_CAPACITY),
            unfinished,
            lines_read: 0,
            source_path: source_path.to_string(),
            source_filename: base_name(source_path).to_string(),
            fallback_year: modified.year(),
            wait_for_boundary,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Number of events currently waiting for their boundary.
    pub fn unfinished_count(&self) -> usize {
        self.unfinished.iter().filter(|p| p.is_some()).count()
    }

    /// Advance the machine by one input and return the events it finalized.
    pub fn feed(&mut self, input: ScanInput<'_>) -> Vec<Event> {
        let mut finished = Vec::new();

        for index in 0..self.types.len() {
            let Some(pending) = self.unfinished[index].as_mut() else {
                continue;
            };
            let boundary = match input {
                ScanInput::EndOfStream => true,
                ScanInput::Line(line) => self.types[index].timestamp_regex().is_match(line),
            };
            if boundary {
                if let Some(pending) = self.unfinished[index].take() {
                    finished.push(self.finalize(pending));
                }
            } else {
                pending.span += 1;
            }
        }

        let ScanInput::Line(line) = input else {
            return finished;
        };

        if self.backlog.len() == constants::BACKLOG_CAPACITY {
            self.backlog.pop_front();
        }
        self.backlog.push_back(line.to_string());
        self.lines_read += 1;

        for index in 0..self.types.len() {
            if self.unfinished[index].is_some() {
                continue;
            }
            let Some(pending) = self.try_match(self.types[index], line) else {
                continue;
            };
            if pending.timestamp_at.is_some() && self.wait_for_boundary {
                self.unfinished[index] = Some(pending);
            } else {
                finished.push(self.finalize(pending));
            }
        }
        finished
    }

    /// Run the text regex of `event_type` over the candidate ending with the
    /// newest line, and build the event when the match ends on that line.
    fn try_match(&self, event_type: &EventType, line: &str) -> Option<Pending> {
        let window = event_type.multiline_count;
        let candidate = if window == 1 {
            line.to_string()
        } else {
            let skip = self.backlog.len().saturating_sub(window);
            self.backlog
                .iter()
                .skip(skip)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        };

        let regex = event_type.text_regex();
        let caps = regex.captures(&candidate)?;
        let whole = caps.get(0)?;
        if candidate.len() - whole.end() >= line.len() {
            return None;
        }
        let match_span = candidate[whole.start()..].matches('\n').count() + 1;

        let mut event = Event::new(
            &event_type.name,
            &event_type.description,
            &self.source_path,
            &self.source_filename,
        );
        for name in regex.capture_names().flatten() {
            let value = caps.name(name).map(|m| m.as_str().to_string());
            event.capture_field(name, value);
        }

        let mut span = match_span;
        let mut timestamp_at = None;
        for (offset, candidate_line) in self.backlog.iter().rev().enumerate() {
            let distance = offset + 1;
            match derive_timestamp(event_type.timestamp_regex(), candidate_line, self.fallback_year)
            {
                Ok(parsed) => {
                    event.set_timestamp(parsed.timestamp);
                    for (name, value) in parsed.extra_fields {
                        if !event.has_field(&name) {
                            event.capture_field(&name, Some(value));
                        }
                    }
                    span = span.max(distance);
                    timestamp_at = Some((span - distance, parsed.span));
                    break;
                }
                Err(e) => {
                    tracing::trace!(
                        file = %self.source_path,
                        event_type = %event_type.name,
                        distance,
                        error = %e,
                        "Timestamp not derived from backlog line"
                    );
                }
            }
        }

        if timestamp_at.is_none() {
            tracing::debug!(
                file = %self.source_path,
                line = self.lines_read,
                event_type = %event_type.name,
                text = %candidate,
                "No timestamp found for event"
            );
        }

        Some(Pending {
            event,
            span,
            timestamp_at,
        })
    }

    /// Attach raw text, line number and timestamp span, taken from the
    /// current backlog, to a pending event.
    fn finalize(&self, pending: Pending) -> Event {
        let Pending {
            mut event,
            span,
            timestamp_at,
        } = pending;

        let available = self.backlog.len();
        let take = span.min(available);
        let lines: Vec<&str> = self
            .backlog
            .iter()
            .skip(available - take)
            .map(String::as_str)
            .collect();
        let dropped = span - take;

        let timestamp_span = timestamp_at
            .and_then(|(index, range)| {
                let index = index.checked_sub(dropped)?;
                let offset: usize = lines[..index].iter().map(|l| l.len() + 1).sum();
                Some(offset + range.start..offset + range.end)
            })
            .unwrap_or(0..0);

        let line_number = (self.lines_read + 1).saturating_sub(span as u64);
        event.set_raw(lines.join("\n"), line_number, timestamp_span);
        event
    }
}

// =============================================================================
// Tests
// =============================================================================
