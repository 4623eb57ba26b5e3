// LogTrawl - platform/fs.rs
//
// Filesystem helpers: lossy line reading and local modification times.

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use std::io::{self, BufRead};
use std::time::SystemTime;

/// Iterator over the lines of a reader, decoded lossily.
///
/// Lines are split on `\n`; trailing `\r` and `\n` bytes are stripped so
/// CRLF files behave like LF files. Invalid UTF-8 is replaced, never fatal.
pub struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

/// Wrap a reader into a [`LossyLines`] iterator.
pub fn lossy_lines<R: BufRead>(reader: R) -> LossyLines<R> {
    LossyLines {
        reader,
        buf: Vec::new(),
    }
}

impl<R: BufRead> Iterator for LossyLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Convert a filesystem time to local wall-clock time, second precision.
pub fn system_time_to_local(t: SystemTime) -> NaiveDateTime {
    let local: DateTime<Local> = t.into();
    truncate_to_seconds(local.naive_local())
}

/// Convert Unix epoch seconds (e.g. a tar header mtime) to local time.
pub fn epoch_to_local(secs: u64) -> Option<NaiveDateTime> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}

fn truncate_to_seconds(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lossy_lines_strip_line_endings() {
        let data = b"first\r\nsecond\n\nlast".to_vec();
        let lines: Vec<String> = lossy_lines(Cursor::new(data))
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["first", "second", "", "last"]);
    }

    #[test]
    fn test_lossy_lines_replace_invalid_utf8() {
        let data = vec![b'o', b'k', 0xff, b'\n'];
        let lines: Vec<String> = lossy_lines(Cursor::new(data))
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["ok\u{fffd}"]);
    }

    #[test]
    fn test_system_time_has_no_subseconds() {
        let t = system_time_to_local(SystemTime::now());
        assert_eq!(t.nanosecond(), 0);
    }

    #[test]
    fn test_epoch_to_local_out_of_range() {
        assert!(epoch_to_local(0).is_some());
        assert!(epoch_to_local(u64::MAX).is_none());
    }
}
