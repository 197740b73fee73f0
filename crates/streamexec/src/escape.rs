//! Removal of terminal escape sequences from tool output.

use std::borrow::Cow;

const ESC: u8 = 0x1b;

/// Strip ANSI escape sequences from a raw line.
///
/// A control sequence (`ESC [` parameters, intermediates, final byte) is
/// skipped through its final byte. Any other escape consumes the byte that
/// follows it. An introducer whose control sequence never terminates is
/// dropped on its own and the remaining bytes are kept. All other bytes are
/// copied in order.
///
/// # Examples
///
/// ```
/// use streamexec::escape::strip_escape_codes;
///
/// let cleaned = strip_escape_codes(b"\x1b[1mExtracting\x1b[0m: a.txt\x1b[K");
/// assert_eq!(&cleaned[..], b"Extracting: a.txt");
///
/// // Lines without escapes are returned untouched
/// let plain = strip_escape_codes(b"plain");
/// assert_eq!(&plain[..], b"plain");
/// ```
pub fn strip_escape_codes(input: &[u8]) -> Cow<'_, [u8]> {
    if !input.contains(&ESC) {
        return Cow::Borrowed(input);
    }

    let mut output = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i] != ESC {
            output.push(input[i]);
            i += 1;
            continue;
        }

        match input.get(i + 1) {
            Some(b'[') => match csi_end(input, i + 2) {
                Some(end) => i = end,
                // Unterminated: drop the stray introducer only
                None => i += 1,
            },
            Some(_) => i += 2,
            None => i += 1,
        }
    }

    Cow::Owned(output)
}

/// Index just past the final byte of a control sequence whose parameters start at `start`.
fn csi_end(input: &[u8], start: usize) -> Option<usize> {
    let mut j = start;
    while let Some(&byte) = input.get(j) {
        match byte {
            // Parameter and intermediate bytes
            0x20..=0x3f => j += 1,
            // Final byte
            0x40..=0x7e => return Some(j + 1),
            _ => return None,
        }
    }
    None
}
