//! Turns an HTML-like directory listing into directory entries.
//!
//! The scanner does not parse HTML. It tracks tag depth and looks for three
//! attributes inside top-level tags: `href=` (the child's name, resolved with
//! [`canonicalise`]), `content-length=` and `last-modified=` (integers). A new
//! entry starts at every top-level `<` once the current entry has a name.

use crate::paths::canonicalise;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirEntry {
    /// Child name relative to the listing; directories end with `/`.
    pub filename: String,
    pub length: Option<u64>,
    /// Seconds since the epoch.
    pub modified: Option<i64>,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.filename.ends_with('/')
    }

    /// Name as shown in the mount (no trailing slash).
    pub fn display_name(&self) -> &str {
        self.filename.trim_end_matches('/')
    }

    /// `mailto:` links are kept by the parser and skipped by listings.
    pub fn is_mailto(&self) -> bool {
        self.filename.starts_with("mailto:")
    }
}

#[derive(Default)]
struct Pending {
    filename: Option<String>,
    length: Option<u64>,
    modified: Option<i64>,
}

impl Pending {
    fn finish(self) -> Option<DirEntry> {
        Some(DirEntry {
            filename: self.filename?,
            length: self.length,
            modified: self.modified,
        })
    }
}

/// Parses `body`, fetched from `source`, into entries sorted by filename with
/// adjacent duplicates collapsed to the first of each run.
pub fn parse_index(body: &[u8], source: &str) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut current = Pending::default();
    let mut depth: i32 = 0;
    let mut word_start = true;
    let mut p = 0;

    while p < body.len() {
        let c = body[p];

        if c == b'<' {
            depth += 1;
            if depth == 1 && current.filename.is_some() {
                entries.extend(std::mem::take(&mut current).finish());
            }
            word_start = true;
            p += 1;
            continue;
        }

        if c == b'>' {
            depth -= 1;
            word_start = true;
            p += 1;
            continue;
        }

        if c.is_ascii_whitespace() {
            word_start = true;
            p += 1;
            continue;
        }

        if word_start && depth == 1 {
            let rest = &body[p..];

            if starts_with_ignore_case(rest, b"href=") {
                let (value, end) = href_value(&rest[5..]);
                if !value.is_empty() {
                    current.filename = canonicalise(&String::from_utf8_lossy(value), source);
                }
                // `end` points at the terminator, which is examined next
                p += 5 + end;
                continue;
            }

            if starts_with_ignore_case(rest, b"content-length=") {
                current.length = Some(leading_integer(skip_quote(&rest[15..])).max(0) as u64);
                p += 16;
                continue;
            }

            if starts_with_ignore_case(rest, b"last-modified=") {
                current.modified = Some(leading_integer(skip_quote(&rest[14..])));
                p += 15;
                continue;
            }
        }

        word_start = false;
        p += 1;
    }
    entries.extend(current.finish());

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    entries.dedup_by(|later, first| later.filename == first.filename);
    entries
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

/// Returns the attribute value and the offset of its terminator.
fn href_value(raw: &[u8]) -> (&[u8], usize) {
    let (start, terminators): (usize, &[u8]) = if raw.first() == Some(&b'"') {
        (1, b"\"\n\t>")
    } else {
        (0, b"\" \n\t)>")
    };
    let len = raw[start..]
        .iter()
        .position(|b| terminators.contains(b))
        .unwrap_or(raw.len() - start);
    (&raw[start..start + len], start + len)
}

fn skip_quote(raw: &[u8]) -> &[u8] {
    raw.strip_prefix(b"\"").unwrap_or(raw)
}

/// `atoi`-style: optional sign, then digits; anything else ends the number.
fn leading_integer(raw: &[u8]) -> i64 {
    let (negative, digits) = match raw.first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let value = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add(i64::from(b - b'0')));
    if negative { -value } else { value }
}
