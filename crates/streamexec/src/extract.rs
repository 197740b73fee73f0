//! Extracting archives through an external tool with live progress.

use crate::control::ControlledProcess;
use crate::decode::{decode_extract_line, find_marker, Marker};
use crate::error::ExecError;
use crate::launch::launch;
use crate::types::{
    format_percentage, ExecConfig, ExtractProgress, ExtractStats, LineControl, Operation,
    ProgressEvent, StreamEnd, Tool,
};
use crate::ProgressCallback;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Run an extract command and track progress against an expected total.
///
/// # Arguments
///
/// * `command` - Shell command that extracts the archive; its last word is
///   taken as the destination (e.g. `lha x -m -n game.lha out/`)
/// * `tool` - Which tool's output format to decode
/// * `total_expected` - Bytes expected in total, usually from a prior list;
///   0 disables percentages
/// * `config` - Execution settings
/// * `progress_cb` - Receives a [`ProgressEvent`] per decoded line and per
///   percentage milestone; returning `false` cancels
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Returns
///
/// Returns `ExtractStats` when entries were extracted, or when the tool
/// printed nothing recognisable but the destination exists afterwards.
pub fn extract_archive(
    command: &str,
    tool: Tool,
    total_expected: u64,
    config: &ExecConfig,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractStats, ExecError> {
    let mut process = launch(command, config)?;
    let result =
        extract_with_process(&mut process, tool, total_expected, progress_cb, &cancel_flag);
    process.cleanup();
    result
}

/// Stream an already launched extract command.
pub fn extract_with_process(
    process: &mut ControlledProcess,
    tool: Tool,
    total_expected: u64,
    progress_cb: &ProgressCallback,
    cancel_flag: &AtomicBool,
) -> Result<ExtractStats, ExecError> {
    let start_time = Instant::now();
    let phrases = process.config().phrases_for(tool, Operation::Extract);
    let estimated_entry_size = process.config().estimated_entry_size;
    let mut progress = ExtractProgress::new(total_expected);

    let stream = process.stream(cancel_flag, |line| {
        if let Some(entry) = decode_extract_line(tool, line) {
            let size = entry.size.unwrap_or(estimated_entry_size);
            let milestone = progress.record(size);
            debug!(
                filename = %entry.filename,
                size,
                cumulative = progress.cumulative_bytes,
                "extracted entry"
            );

            let keep_going = progress_cb(&ProgressEvent::Extracted {
                filename: entry.filename,
                size,
                file_count: progress.file_count,
                cumulative_bytes: progress.cumulative_bytes,
                percentage_x10: progress.percentage_x10(),
            });
            if !keep_going {
                return LineControl::Stop;
            }

            return match milestone {
                Some(percentage_x10) => {
                    debug!(progress = %format_percentage(percentage_x10), "progress milestone");
                    LineControl::from(progress_cb(&ProgressEvent::Milestone { percentage_x10 }))
                }
                None => LineControl::Continue,
            };
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

    let mut destination_fallback = false;
    if progress.file_count == 0 {
        match destination_hint(process.command()) {
            Some(dest) if Path::new(&dest).exists() => {
                warn!(
                    destination = %dest,
                    "no extraction progress seen, destination exists so assuming success"
                );
                destination_fallback = true;
            }
            _ => {
                return Err(ExecError::NoProgress {
                    tool: tool.label().to_string(),
                })
            }
        }
    }

    let silent = process.config().silent_mode;
    narrate!(
        silent,
        "Extraction completed successfully! Files extracted: {}, bytes processed: {}",
        progress.file_count,
        progress.cumulative_bytes
    );
    if let Some(percentage_x10) = progress.percentage_x10() {
        narrate!(silent, "Final percentage: {}", format_percentage(percentage_x10));
    }

    Ok(ExtractStats {
        files_extracted: progress.file_count,
        bytes_extracted: progress.cumulative_bytes,
        total_expected,
        percentage_x10: progress.percentage_x10(),
        completion_detected: progress.completion_detected,
        error_detected: progress.error_detected,
        destination_fallback,
        stream,
        exit_code,
        duration: start_time.elapsed(),
    })
}

/// Last word of an extract command, with shell quoting removed.
fn destination_hint(command: &str) -> Option<String> {
    let mut words = shell_words(command);
    if words.len() < 2 {
        return None;
    }
    words.pop()
}

/// Split a command line into words the way `sh` does for plain quoting:
/// single quotes, double quotes and backslash escapes.
fn shell_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                word.extend(chars.by_ref().take_while(|&c| c != '\''));
            }
            '"' => {
                in_word = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some(next @ ('"' | '\\' | '$' | '`')) => word.push(next),
                            Some(next) => {
                                word.push('\\');
                                word.push(next);
                            }
                            None => word.push('\\'),
                        },
                        _ => word.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    word.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    words
}
