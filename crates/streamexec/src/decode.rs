//! Decoders for the console output of the wrapped archivers.
//!
//! Each decoder looks at one cleaned line and either extracts the fields of a
//! progress line or returns `None`. Banners, headers, warnings and anything
//! else the tool prints simply do not match; none of this is an error.

use crate::types::{PhraseSet, Tool};

/// Marker LhA prints before each extracted entry.
const LHA_EXTRACT_MARKER: &str = " Extracting: (";

/// Markers unzip prints before each extracted entry.
const UNZIP_EXTRACT_MARKERS: [&str; 2] = ["inflating:", "extracting:"];

/// A decoded list line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntry {
    /// Uncompressed size in bytes
    pub size: u64,
}

/// A decoded extract line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractEntry {
    /// Size in bytes, when the tool prints one
    pub size: Option<u64>,

    /// Entry name as printed by the tool
    pub filename: String,
}

/// A completion or error phrase found in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker<'p> {
    /// The tool reported success
    Completion(&'p str),
    /// The tool reported a failure
    Error(&'p str),
}

/// Look for an error phrase, then a completion phrase.
pub fn find_marker<'p>(phrases: &'p PhraseSet, line: &str) -> Option<Marker<'p>> {
    if let Some(phrase) = phrases.error_in(line) {
        return Some(Marker::Error(phrase));
    }
    phrases.completion_in(line).map(Marker::Completion)
}

/// Decode a list line for `tool`.
pub fn decode_list_line(tool: Tool, line: &str) -> Option<ListEntry> {
    match tool {
        Tool::Lha => parse_lha_list_line(line),
        Tool::Unzip => parse_unzip_list_line(line),
    }
}

/// Decode an extract line for `tool`.
pub fn decode_extract_line(tool: Tool, line: &str) -> Option<ExtractEntry> {
    match tool {
        Tool::Lha => parse_lha_extract_line(line),
        Tool::Unzip => parse_unzip_extract_line(line),
    }
}

/// Parse an LhA list line.
///
/// Entry lines look like `   10380    6306 39.2% 06-Jul-112 19:06:46 +A10`;
/// the first column is the original size. The trailing summary
/// (`... 38 files`) is rejected so it never adds to the totals.
///
/// # Examples
///
/// ```
/// use streamexec::decode::parse_lha_list_line;
///
/// let entry = parse_lha_list_line("   10380    6306 39.2% 06-Jul-112 19:06:46 +A10").unwrap();
/// assert_eq!(entry.size, 10380);
///
/// assert!(parse_lha_list_line(" 2341998 1833297 21.7% 11-Jul-80 21:21:14   38 files").is_none());
/// ```
pub fn parse_lha_list_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_start_matches([' ', '\t']);
    if is_summary_line(line) {
        return None;
    }

    let size = leading_size(line)?;

    // Genuine entries carry the filename column after a " +" or a wide gap
    if !line.contains(" +") && !line.contains("  ") {
        return None;
    }

    Some(ListEntry { size })
}

/// Parse an LhA extract line.
///
/// Lines look like ` Extracting: (   10380)  A10TankKiller3Disk/data/A10[K`.
/// The filename ends at the first control byte or `[`, whichever comes
/// first, and is trimmed of trailing whitespace.
///
/// # Examples
///
/// ```
/// use streamexec::decode::parse_lha_extract_line;
///
/// let line = " Extracting: (   10380)  A10TankKiller3Disk/data/A10[K";
/// let entry = parse_lha_extract_line(line).unwrap();
/// assert_eq!(entry.size, Some(10380));
/// assert_eq!(entry.filename, "A10TankKiller3Disk/data/A10");
/// ```
pub fn parse_lha_extract_line(line: &str) -> Option<ExtractEntry> {
    let start = line.find(LHA_EXTRACT_MARKER)? + LHA_EXTRACT_MARKER.len();
    let rest = line[start..].trim_start_matches(' ');

    let digits = digit_prefix(rest);
    let size = if digits.is_empty() {
        0
    } else {
        digits.parse::<u64>().ok()?
    };

    let close = rest.find(')')?;
    let name_part = rest[close + 1..].trim_start_matches([' ', '\t']);

    Some(ExtractEntry {
        size: Some(size),
        filename: filename_until(name_part, |c| c == '[' || c < ' '),
    })
}

/// Parse an unzip list line (`   10380  07-06-2025 15:30   file.ext`).
///
/// The total line at the end (`   20760                     2 files`) is
/// rejected like LhA's summary.
pub fn parse_unzip_list_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_start_matches([' ', '\t']);
    if is_summary_line(line) {
        return None;
    }
    leading_size(line).map(|size| ListEntry { size })
}

/// Parse an unzip extract line (`  inflating: dir/file.ext`).
///
/// unzip prints no size while extracting, so `size` is always `None`.
pub fn parse_unzip_extract_line(line: &str) -> Option<ExtractEntry> {
    let (pos, marker) = UNZIP_EXTRACT_MARKERS
        .iter()
        .find_map(|marker| line.find(marker).map(|pos| (pos, *marker)))?;
    let name_part = line[pos + marker.len()..].trim_start_matches([' ', '\t']);

    let filename = filename_until(name_part, |c| c < ' ');
    if filename.is_empty() {
        return None;
    }

    Some(ExtractEntry {
        size: None,
        filename,
    })
}

/// Whether a list line is the tool's closing file-count summary.
fn is_summary_line(line: &str) -> bool {
    line.contains(" files") || line.trim_end().ends_with(" file")
}

/// Leading decimal size followed by a column separator.
fn leading_size(line: &str) -> Option<u64> {
    let digits = digit_prefix(line);
    if digits.is_empty() {
        return None;
    }
    match line[digits.len()..].chars().next() {
        Some(' ') | Some('\t') => digits.parse().ok(),
        _ => None,
    }
}

fn digit_prefix(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

fn filename_until(s: &str, stop: impl Fn(char) -> bool) -> String {
    let end = s.find(stop).unwrap_or(s.len());
    s[..end].trim_end().to_string()
}
