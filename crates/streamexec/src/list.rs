//! Listing archive contents through an external tool.

use crate::control::ControlledProcess;
use crate::decode::{decode_list_line, find_marker, Marker};
use crate::error::ExecError;
use crate::launch::launch;
use crate::types::{
    ExecConfig, LineControl, ListProgress, ListStats, Operation, ProgressEvent, StreamEnd, Tool,
};
use crate::ProgressCallback;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Run a list command and total the sizes of the entries it prints.
///
/// # Arguments
///
/// * `command` - Shell command that lists the archive (e.g. `lha l game.lha`)
/// * `tool` - Which tool's output format to decode
/// * `config` - Execution settings
/// * `progress_cb` - Receives a [`ProgressEvent`] per decoded line; returning
///   `false` cancels
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Returns
///
/// Returns `ListStats` when at least one entry was listed.
pub fn list_archive(
    command: &str,
    tool: Tool,
    config: &ExecConfig,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ListStats, ExecError> {
    let mut process = launch(command, config)?;
    let result = list_with_process(&mut process, tool, progress_cb, &cancel_flag);
    process.cleanup();
    result
}

/// Stream an already launched list command.
pub fn list_with_process(
    process: &mut ControlledProcess,
    tool: Tool,
    progress_cb: &ProgressCallback,
    cancel_flag: &AtomicBool,
) -> Result<ListStats, ExecError> {
    let start_time = Instant::now();
    let phrases = process.config().phrases_for(tool, Operation::List);
    let mut progress = ListProgress::default();

    let stream = process.stream(cancel_flag, |line| {
        // Entries first: a filename may well contain a phrase like "Done"
        if let Some(entry) = decode_list_line(tool, line) {
            progress.record(entry.size);
            debug!(
                size = entry.size,
                file_count = progress.file_count,
                total_size = progress.total_size,
                "listed entry"
            );
            return LineControl::from(progress_cb(&ProgressEvent::Listed {
                size: entry.size,
                file_count: progress.file_count,
                total_size: progress.total_size,
            }));
        }

        match find_marker(&phrases, line) {
            Some(Marker::Error(phrase)) => {
                progress.error_detected = true;
                warn!(tool = %tool, phrase, line, "tool reported an error");
                LineControl::from(progress_cb(&ProgressEvent::ToolError {
                    line: line.to_string(),
                }))
            }
            Some(Marker::Completion(phrase)) => {
                progress.completion_detected = true;
                debug!(tool = %tool, phrase, "completion detected");
                LineControl::from(progress_cb(&ProgressEvent::Completed {
                    line: line.to_string(),
                }))
            }
            None => LineControl::Continue,
        }
    })?;

    if stream.end == StreamEnd::Cancelled || cancel_flag.load(Ordering::Relaxed) {
        return Err(ExecError::Cancelled);
    }

    let exit_code = process.resolve_exit_code().ok();

    if progress.file_count == 0 {
        return Err(ExecError::NoProgress {
            tool: tool.label().to_string(),
        });
    }

    narrate!(
        process.config().silent_mode,
        "{} listing completed - {} files, {} bytes",
        tool,
        progress.file_count,
        progress.total_size
    );

    Ok(ListStats {
        total_size: progress.total_size,
        file_count: progress.file_count,
        completion_detected: progress.completion_detected,
        error_detected: progress.error_detected,
        stream,
        exit_code,
        duration: start_time.elapsed(),
    })
}
