//! Reconstruction of logical lines from arbitrarily split byte reads.
//!
//! The wrapped tools write to the channel in whatever pieces the host
//! delivers, so a line may arrive across many reads and one read may hold
//! many lines. [`LineReassembler`] carries the unfinished tail between reads
//! and yields each completed line exactly once.

use crate::error::ExecError;
use std::mem;

/// Carry-over buffer turning byte chunks into lines.
///
/// Both `\n` and `\r` end a line; empty lines are skipped, so `\r\n` yields a
/// single line. A partial line that reaches the capacity is flushed as a line
/// of its own before the next byte is buffered, which keeps memory bounded
/// when a tool writes long runs without line breaks. The flush never splits a
/// UTF-8 character: an incomplete trailing sequence moves on to the next
/// segment.
#[derive(Debug)]
pub struct LineReassembler {
    partial: Vec<u8>,
    capacity: usize,
}

impl LineReassembler {
    /// Create a reassembler that force-flushes partial lines at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            partial: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Feed one chunk and iterate over the lines it completes.
    ///
    /// The iterator is lazy: bytes of `chunk` past the point where it is
    /// dropped are never buffered. The reader loop relies on this to stop
    /// delivering lines as soon as the sink asks it to.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Lines<'a> {
        Lines {
            owner: self,
            chunk,
            pos: 0,
        }
    }

    /// Take the unfinished tail at end of stream, if there is one.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.partial))
        }
    }

    /// Bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Forced-flush threshold in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Lines completed by one chunk. See [`LineReassembler::feed`].
#[derive(Debug)]
pub struct Lines<'a> {
    owner: &'a mut LineReassembler,
    chunk: &'a [u8],
    pos: usize,
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while let Some(&byte) = self.chunk.get(self.pos) {
            self.pos += 1;

            if byte == b'\n' || byte == b'\r' {
                if !self.owner.partial.is_empty() {
                    return Some(mem::take(&mut self.owner.partial));
                }
                continue;
            }

            if self.owner.partial.len() >= self.owner.capacity {
                tracing::debug!(
                    reason = %ExecError::LineOverflow { capacity: self.owner.capacity },
                    "forcing line completion"
                );
                let partial = &mut self.owner.partial;
                let keep = match incomplete_tail(partial) {
                    n if n == partial.len() => 0,
                    n => n,
                };
                let carried = partial.split_off(partial.len() - keep);
                let full = mem::replace(partial, carried);
                partial.push(byte);
                return Some(full);
            }

            self.owner.partial.push(byte);
        }
        None
    }
}

/// Length of a multibyte UTF-8 sequence cut short at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_whole(input: &[u8], capacity: usize) -> Vec<Vec<u8>> {
        let mut reassembler = LineReassembler::new(capacity);
        let mut lines: Vec<Vec<u8>> = reassembler.feed(input).collect();
        lines.extend(reassembler.finish());
        lines
    }

    fn collect_chunked(input: &[u8], capacity: usize, chunk_sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut reassembler = LineReassembler::new(capacity);
        let mut lines = Vec::new();
        let mut rest = input;
        let mut i = 0;
        while !rest.is_empty() {
            let size = chunk_sizes[i % chunk_sizes.len()].min(rest.len());
            let (chunk, tail) = rest.split_at(size);
            lines.extend(reassembler.feed(chunk));
            rest = tail;
            i += 1;
        }
        lines.extend(reassembler.finish());
        lines
    }

    #[test]
    fn test_splits_on_lf_and_cr() {
        let lines = collect_whole(b"one\ntwo\rthree\r\nfour", 64);
        assert_eq!(
            lines,
            vec![
                b"one".to_vec(),
                b"two".to_vec(),
                b"three".to_vec(),
                b"four".to_vec()
            ]
        );
    }

    #[test]
    fn test_boundary_independence() {
        let input: &[u8] = b" Extracting: (   10380)  A10/data/A10\x1b[K\r\n\
            \n\n   10380    6306 39.2% 06-Jul-112 19:06:46 +A10\n\
            a fairly long banner line that will cross the small capacity\rtail";

        for capacity in [8, 16, 200] {
            let expected = collect_whole(input, capacity);
            for size in 1..=input.len() {
                assert_eq!(
                    collect_chunked(input, capacity, &[size]),
                    expected,
                    "chunk size {size}, capacity {capacity}"
                );
            }
            // Irregular chunking
            assert_eq!(collect_chunked(input, capacity, &[1, 7, 2, 13, 3]), expected);
            assert_eq!(collect_chunked(input, capacity, &[5, 1, 1, 29]), expected);
        }
    }

    #[test]
    fn test_forced_flush_preserves_every_byte() {
        let long_line = vec![b'x'; 1000];
        let lines = collect_chunked(&long_line, 120, &[64]);

        assert!(lines.len() > 1);
        assert!(lines.iter().all(|segment| segment.len() <= 120));
        let total: usize = lines.iter().map(Vec::len).sum();
        assert_eq!(total, long_line.len());
    }

    #[test]
    fn test_forced_flush_respects_utf8_boundaries() {
        let line = "añb€c𝄞d".repeat(20);
        for capacity in [4, 5, 7, 16] {
            let lines = collect_chunked(line.as_bytes(), capacity, &[3]);
            assert!(lines.iter().all(|segment| segment.len() <= capacity));
            let text: Vec<&str> = lines
                .iter()
                .map(|segment| std::str::from_utf8(segment).unwrap())
                .collect();
            assert_eq!(text.concat(), line, "capacity {capacity}");
        }
    }

    #[test]
    fn test_incomplete_tail() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail("aé".as_bytes()), 0);
        assert_eq!(incomplete_tail(&"a€".as_bytes()[..3]), 2);
        assert_eq!(incomplete_tail(&"𝄞".as_bytes()[..1]), 1);
        // Stray continuation bytes are not held back
        assert_eq!(incomplete_tail(b"a\x80\x80\x80"), 0);
    }

    #[test]
    fn test_finish_flushes_tail_once() {
        let mut reassembler = LineReassembler::new(32);
        assert_eq!(reassembler.feed(b"abc\npartial").count(), 1);
        assert_eq!(reassembler.pending(), 7);
        assert_eq!(reassembler.finish(), Some(b"partial".to_vec()));
        assert_eq!(reassembler.finish(), None);
    }

    #[test]
    fn test_dropping_iterator_leaves_rest_unbuffered() {
        let mut reassembler = LineReassembler::new(32);
        let mut lines = reassembler.feed(b"a\nb\nc\nd");
        assert_eq!(lines.next(), Some(b"a".to_vec()));
        drop(lines);
        assert_eq!(reassembler.pending(), 0);
        assert_eq!(reassembler.finish(), None);
    }

    #[test]
    fn test_only_line_breaks() {
        assert!(collect_whole(b"\r\n\r\n\n", 4).is_empty());
    }
}
