//! The streaming reader loop.
//!
//! Pulls bytes from a [`ByteSource`], reassembles lines, strips escape
//! sequences and hands each cleaned line to a sink. The loop is bounded by
//! an idle budget: a run of consecutive empty polls ends it even when the
//! writer never closes the channel.

use crate::channel::ByteSource;
use crate::error::ExecError;
use crate::escape::strip_escape_codes;
use crate::reassemble::LineReassembler;
use crate::types::{ExecConfig, LineControl, StreamEnd, StreamOutcome};
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, trace, warn};

/// Drive `source` until it ends, goes idle, hits the line limit or is cancelled.
///
/// `sink` sees every logical line exactly once, escape sequences removed and
/// decoded lossily as UTF-8. Returning [`LineControl::Stop`] ends the loop
/// with [`StreamEnd::Cancelled`]; so does setting `cancel_flag`. The
/// unfinished tail of the stream is delivered on every exit path.
pub fn read_stream<S, F>(
    source: &mut S,
    config: &ExecConfig,
    cancel_flag: &AtomicBool,
    mut sink: F,
) -> StreamOutcome
where
    S: ByteSource + ?Sized,
    F: FnMut(&str) -> LineControl,
{
    let budget = config.idle_budget();
    let interval = config.poll_interval();
    let mut reassembler = LineReassembler::new(config.line_capacity);
    let mut buf = vec![0u8; config.read_chunk_size.max(1)];

    let mut lines = 0u64;
    let mut bytes = 0u64;
    let mut reads = 0u64;
    let mut idle_polls = 0u32;

    let end = 'read: loop {
        if cancel_flag.load(Ordering::Relaxed) {
            debug!("cancel flag set, stopping reader");
            break StreamEnd::Cancelled;
        }
        if source.halted() {
            debug!("writer was killed, stopping reader");
            break StreamEnd::Cancelled;
        }

        reads += 1;
        match source.read_chunk(&mut buf) {
            Ok(n) if n > 0 => {
                idle_polls = 0;
                bytes += n as u64;
                trace!(bytes = n, "read chunk");

                for raw in reassembler.feed(&buf[..n]) {
                    if deliver(&raw, &mut sink, &mut lines) == LineControl::Stop {
                        debug!(lines, "sink requested stop");
                        break 'read StreamEnd::Cancelled;
                    }
                    if lines >= config.max_lines {
                        warn!(max_lines = config.max_lines, "line limit reached, stopping reader");
                        break 'read StreamEnd::LineLimit;
                    }
                }
                continue;
            }
            Ok(_) => {
                if source.writer_closed() {
                    debug!(lines, bytes, "end of stream");
                    break StreamEnd::Eof;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                let error = ExecError::ReadFailure(e);
                warn!(error = %error, "read failed, retrying");
            }
        }

        idle_polls += 1;
        if idle_polls >= budget {
            let reason = ExecError::IdleTimeout { polls: idle_polls };
            debug!(reason = %reason, "presuming stream finished");
            break StreamEnd::IdleTimeout;
        }

        if let Err(e) = source.wait_readable(interval) {
            trace!(error = %e, "wait for data failed, sleeping instead");
            thread::sleep(interval);
        }
    };

    if let Some(tail) = reassembler.finish() {
        // The loop is over; a stop request from this last line changes nothing
        let _ = deliver(&tail, &mut sink, &mut lines);
    }

    StreamOutcome {
        end,
        lines,
        bytes,
        reads,
    }
}

fn deliver<F>(raw: &[u8], sink: &mut F, lines: &mut u64) -> LineControl
where
    F: FnMut(&str) -> LineControl,
{
    let cleaned = strip_escape_codes(raw);
    let text = String::from_utf8_lossy(&cleaned);
    *lines += 1;
    trace!(line = *lines, text = %text, "delivering line");
    sink(&text)
}
