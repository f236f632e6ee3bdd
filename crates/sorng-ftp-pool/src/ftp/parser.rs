//! `LIST` response parser.
//!
//! Understands the two listing dialects servers actually send:
//! 1. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **Windows/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//!
//! Lines matching neither become `FileKind::Unknown` entries carrying the
//! raw text as the name. Names are returned exactly as they came off the
//! wire; turning them back into readable text is the path codec's job.

use crate::ftp::types::{FileKind, FileMetadata};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_RE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})[@+.]?\s+   # permissions
        (\d+)\s+                              # link count
        (\S+)\s+                              # owner
        (\S+)\s+                              # group
        (\d+)\s+                              # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s           # date
        (.+)$                                 # name (possibly with -> target)
        ",
    )
    .expect("valid unix listing regex");
    static ref WINDOWS_RE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+             # date
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+          # time
        (<DIR>|\d+)\s+                        # size or <DIR>
        (.+)$                                 # name
        ",
    )
    .expect("valid windows listing regex");
}

/// Parse a full `LIST` response body. `.` / `..` and `total N` lines are
/// dropped.
pub fn parse_listing(raw: &str) -> Vec<FileMetadata> {
    raw.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.starts_with("total "))
        .map(parse_line)
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str) -> FileMetadata {
    parse_unix(line)
        .or_else(|| parse_windows(line))
        .unwrap_or_else(|| {
            let mut entry = FileMetadata::new(line.trim(), FileKind::Unknown, 0);
            entry.raw = Some(line.to_string());
            entry
        })
}

// ─── Unix-style ──────────────────────────────────────────────────────

fn parse_unix(line: &str) -> Option<FileMetadata> {
    let caps = UNIX_RE.captures(line)?;

    let perms = caps.get(1)?.as_str();
    let kind = match perms.as_bytes().first() {
        Some(b'd') => FileKind::Directory,
        Some(b'l') => FileKind::Symlink,
        Some(b'-') => FileKind::File,
        _ => FileKind::Unknown,
    };

    let name_raw = caps.get(7)?.as_str().trim_start();
    let (name, link_target) = match (kind, name_raw.split_once(" -> ")) {
        (FileKind::Symlink, Some((name, target))) => (name.to_string(), Some(target.to_string())),
        _ => (name_raw.to_string(), None),
    };

    Some(FileMetadata {
        name,
        kind,
        size: caps.get(5)?.as_str().parse().unwrap_or(0),
        modified: parse_unix_date(caps.get(6)?.as_str(), Utc::now()),
        permissions: Some(perms.to_string()),
        owner: caps.get(3).map(|m| m.as_str().to_string()),
        group: caps.get(4).map(|m| m.as_str().to_string()),
        link_target,
        raw: Some(line.to_string()),
    })
}

/// `Jan  1 12:00` (within the last six months, year implied) or
/// `Jan  1  2025`.
fn parse_unix_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalised.contains(':') {
        let dt = NaiveDateTime::parse_from_str(
            &format!("{} {}", now.year(), normalised),
            "%Y %b %d %H:%M",
        )
        .ok()?;
        let dt = Utc.from_utc_datetime(&dt);
        // A time-only stamp in the future belongs to last year.
        if dt > now + chrono::Duration::days(1) {
            let prev = NaiveDateTime::parse_from_str(
                &format!("{} {}", now.year() - 1, normalised),
                "%Y %b %d %H:%M",
            )
            .ok()?;
            return Some(Utc.from_utc_datetime(&prev));
        }
        return Some(dt);
    }

    let date = NaiveDate::parse_from_str(&normalised, "%b %d %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

// ─── Windows-style ───────────────────────────────────────────────────

fn parse_windows(line: &str) -> Option<FileMetadata> {
    let caps = WINDOWS_RE.captures(line)?;

    let size_or_dir = caps.get(3)?.as_str();
    let (kind, size) = if size_or_dir == "<DIR>" {
        (FileKind::Directory, 0)
    } else {
        (FileKind::File, size_or_dir.parse().unwrap_or(0))
    };

    let mut entry = FileMetadata::new(caps.get(4)?.as_str(), kind, size);
    entry.modified = parse_windows_date(caps.get(1)?.as_str(), caps.get(2)?.as_str());
    entry.raw = Some(line.to_string());
    Some(entry)
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}
