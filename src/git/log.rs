//! Decoder for `git rev-list --header` output.
//!
//! Each commit is one NUL-terminated record:
//!
//! ```text
//! <commit sha>
//! tree <sha>
//! parent <sha>                      (zero or more)
//! author <name> <epoch> <tz>
//! committer <name> <epoch> <tz>
//! [other headers: gpgsig, encoding, mergetag, ...]
//! <empty line>
//!     <subject>
//!     <blank>
//!     <body...>
//! ```
//!
//! Decoding is positional. The commit, tree, author and committer lines must
//! appear in that order; anything missing is a [`LogDecodeError`]. The message
//! is optional and decodes to empty strings when absent.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use thiserror::Error;

use crate::types::Sha;

/// Indent git applies to every message line in raw output.
const MESSAGE_INDENT: &str = "    ";

/// A malformed record in a batch of log output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed commit record #{record}: {reason}")]
pub struct LogDecodeError {
    /// Index of the failing record within the batch (0 for single decodes).
    pub record: usize,
    pub reason: DecodeFailure,
}

/// Why a single record failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("record is empty")]
    Empty,

    #[error("expected `{0}` line")]
    MissingMarker(&'static str),

    #[error("unterminated {0} line")]
    Unterminated(&'static str),

    #[error("{field} line has no timestamp and timezone: {line:?}")]
    MissingTime { field: &'static str, line: String },

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid timezone offset {0:?}")]
    InvalidTimezone(String),
}

/// Metadata of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub commit: Sha,
    pub tree: Sha,
    /// Parents in recorded order; two or more for merge commits.
    pub parents: Vec<Sha>,
    pub author: String,
    pub author_time: DateTime<FixedOffset>,
    pub committer: String,
    pub committer_time: DateTime<FixedOffset>,
    /// First line of the message, without git's indent.
    pub subject: String,
    /// Remaining message lines after the subject, without git's indent.
    pub body: String,
}

impl LogEntry {
    /// Decode a single record (without its NUL terminator).
    pub fn decode(record: &[u8]) -> Result<LogEntry, LogDecodeError> {
        decode_record(record).map_err(|reason| LogDecodeError { record: 0, reason })
    }

    /// Returns true if this is a merge commit.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Decode a full `rev-list --header` blob.
///
/// Zero-length fragments (the one after the final NUL) are skipped. One bad
/// record fails the whole batch.
pub fn decode_all(output: &[u8]) -> Result<Vec<LogEntry>, LogDecodeError> {
    output
        .split(|b| *b == 0)
        .filter(|fragment| !fragment.is_empty())
        .enumerate()
        .map(|(record, fragment)| {
            decode_record(fragment).map_err(|reason| LogDecodeError { record, reason })
        })
        .collect()
}

/// Cursor over the lines of a record.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    /// Take the next newline-terminated line.
    fn line(&mut self, what: &'static str) -> Result<&'a str, DecodeFailure> {
        let idx = self.rest.find('\n').ok_or(DecodeFailure::Unterminated(what))?;
        let line = &self.rest[..idx];
        self.rest = &self.rest[idx + 1..];
        Ok(line)
    }

    /// Take the next line, which must start with `marker`, returning the rest of it.
    fn field(&mut self, marker: &'static str) -> Result<&'a str, DecodeFailure> {
        if !self.rest.starts_with(marker) {
            return Err(DecodeFailure::MissingMarker(marker));
        }
        let line = self.line(marker)?;
        Ok(&line[marker.len()..])
    }

    /// Take the next line if it starts with `marker`.
    fn optional_field(&mut self, marker: &'static str) -> Result<Option<&'a str>, DecodeFailure> {
        if self.rest.starts_with(marker) {
            self.field(marker).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn decode_record(record: &[u8]) -> Result<LogEntry, DecodeFailure> {
    if record.is_empty() {
        return Err(DecodeFailure::Empty);
    }
    let text = String::from_utf8_lossy(record);
    let mut cur = Cursor { rest: &text };

    let commit = cur.line("commit")?;
    if commit.is_empty() {
        return Err(DecodeFailure::MissingMarker("<commit sha>"));
    }
    let commit = Sha::new(commit);

    let tree = Sha::new(cur.field("tree ")?);

    let mut parents = Vec::new();
    while let Some(parent) = cur.optional_field("parent ")? {
        parents.push(Sha::new(parent));
    }

    let (author, author_time) = person_time("author", cur.field("author ")?)?;
    let (committer, committer_time) = person_time("committer", cur.field("committer ")?)?;

    skip_extra_headers(&mut cur)?;
    let (subject, body) = message(cur.rest);

    Ok(LogEntry {
        commit,
        tree,
        parents,
        author,
        author_time,
        committer,
        committer_time,
        subject,
        body,
    })
}

/// Split `<name> <epoch> <tz>` at the last two spaces so names may contain spaces.
fn person_time(
    field: &'static str,
    line: &str,
) -> Result<(String, DateTime<FixedOffset>), DecodeFailure> {
    let missing = || DecodeFailure::MissingTime {
        field,
        line: line.to_string(),
    };
    let (rest, tz) = line.rsplit_once(' ').ok_or_else(missing)?;
    let (name, epoch) = rest.rsplit_once(' ').ok_or_else(missing)?;

    let seconds: i64 = epoch
        .parse()
        .map_err(|_| DecodeFailure::InvalidTimestamp(epoch.to_string()))?;
    let offset = parse_tz_offset(tz)?;
    let time = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| DecodeFailure::InvalidTimestamp(epoch.to_string()))?
        .with_timezone(&offset);

    Ok((name.to_string(), time))
}

/// Parse git's `+hhmm` / `-hhmm` offset.
fn parse_tz_offset(tz: &str) -> Result<FixedOffset, DecodeFailure> {
    let invalid = || DecodeFailure::InvalidTimezone(tz.to_string());
    let (sign, digits) = match tz.split_at_checked(1) {
        Some(("+", digits)) => (1, digits),
        Some(("-", digits)) => (-1, digits),
        _ => return Err(invalid()),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Skip headers after `committer` (gpgsig, mergetag, encoding, ...) up to the
/// blank line that separates headers from the message.
///
/// Continuation lines of multi-line headers start with a space and are never
/// empty, so the first empty line is the separator. A record may also end
/// right after its headers.
fn skip_extra_headers(cur: &mut Cursor<'_>) -> Result<(), DecodeFailure> {
    while !cur.rest.is_empty() {
        if cur.line("header")?.is_empty() {
            break;
        }
    }
    Ok(())
}

fn message(rest: &str) -> (String, String) {
    let mut lines = rest.lines().map(strip_indent);

    let subject = lines.next().unwrap_or_default().to_string();

    let mut body: Vec<&str> = lines.collect();
    if body.first().is_some_and(|l| l.trim().is_empty()) {
        body.remove(0);
    }
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }

    (subject, body.join("\n"))
}

fn strip_indent(line: &str) -> &str {
    line.strip_prefix(MESSAGE_INDENT)
        .unwrap_or_else(|| line.trim_start_matches(' '))
}
