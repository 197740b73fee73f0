//! # Streamexec
//!
//! Controlled execution of external archivers with live, line-oriented
//! progress.
//!
//! A tool is started through the shell with its stdout bound to a named
//! channel created for that invocation. Its output is read as it is produced,
//! split into lines, stripped of terminal escape sequences and decoded into
//! progress events. The running tool can be paused, resumed, terminated or
//! killed from any thread while its output is being streamed.
//!
//! ## Supported Tools
//!
//! - LhA (`lha l`, `lha x`)
//! - Info-ZIP unzip (`unzip -l`, `unzip -o ... -d`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use streamexec::{list, extract, ExecConfig, Operation, ProgressEvent, Tool};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cancel_flag = Arc::new(AtomicBool::new(false));
//! let quiet = |_: &ProgressEvent| true;
//!
//! // Total the archive first
//! let config = ExecConfig::for_tool(Tool::Lha, Operation::List);
//! let listing = list("lha l game.lha", Tool::Lha, &config, &quiet, cancel_flag.clone())?;
//! println!("{} files, {} bytes", listing.file_count, listing.total_size);
//!
//! // Then extract against that total
//! let config = ExecConfig::for_tool(Tool::Lha, Operation::Extract);
//! let progress_cb = |event: &ProgressEvent| {
//!     if let ProgressEvent::Extracted { filename, .. } = event {
//!         println!("Extracting: {}", filename);
//!     }
//!     true // Continue extraction
//! };
//!
//! let stats = extract(
//!     "lha x -m -n game.lha out/",
//!     Tool::Lha,
//!     listing.total_size,
//!     &config,
//!     &progress_cb,
//!     cancel_flag,
//! )?;
//!
//! println!("Extracted {} files ({} bytes)", stats.files_extracted, stats.bytes_extracted);
//! # Ok(())
//! # }
//! ```

/// Log narration at info level, or at debug level in silent mode.
macro_rules! narrate {
    ($silent:expr, $($arg:tt)+) => {
        if $silent {
            tracing::debug!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}

pub mod channel;
pub mod control;
pub mod decode;
pub mod error;
pub mod escape;
pub mod exit_status;
pub mod extract;
pub mod launch;
pub mod list;
pub mod reader;
pub mod reassemble;
pub mod types;

// Re-export main types
pub use channel::ByteSource;
pub use control::{ControlledProcess, ProcessController};
pub use error::ExecError;
pub use launch::launch;
pub use reader::read_stream;
pub use types::{
    ExecConfig, ExecOutcome, ExitCodePolicy, ExtractStats, LineControl, ListStats, Operation,
    PhraseSet, ProgressEvent, StreamEnd, StreamOutcome, Tool,
};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Type alias for progress callback functions.
///
/// Called once per decoded line and per percentage milestone. Returns `true`
/// to continue, `false` to cancel the invocation.
pub type ProgressCallback = dyn Fn(&ProgressEvent) -> bool + Send + Sync;

/// Run a command and hand every line of its output to `sink`.
///
/// This is the undecoded path: no progress accounting, no success rule. The
/// exit code is resolved after the stream ends and reported when known.
///
/// # Errors
///
/// Returns an error if the channel cannot be set up or the command cannot be
/// started at all.
pub fn execute<F>(
    command: &str,
    config: &ExecConfig,
    cancel_flag: &AtomicBool,
    sink: F,
) -> Result<ExecOutcome, ExecError>
where
    F: FnMut(&str) -> LineControl,
{
    let mut process = launch(command, config)?;
    let stream = process.stream(cancel_flag, sink)?;
    let exit_code = if stream.end == StreamEnd::Cancelled {
        None
    } else {
        process.resolve_exit_code().ok()
    };
    process.cleanup();
    Ok(ExecOutcome { stream, exit_code })
}

/// List an archive and total its entry sizes.
///
/// # Arguments
///
/// * `command` - Shell command that lists the archive
/// * `tool` - Which tool's output format to decode
/// * `config` - Execution settings
/// * `progress_cb` - Callback function for progress updates
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Errors
///
/// Returns an error if:
/// - The tool cannot be started
/// - No entry line was recognised
/// - Listing is cancelled
pub fn list(
    command: &str,
    tool: Tool,
    config: &ExecConfig,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ListStats, ExecError> {
    list::list_archive(command, tool, config, progress_cb, cancel_flag)
}

/// Extract an archive, reporting progress against `total_expected` bytes.
///
/// # Arguments
///
/// * `command` - Shell command that extracts the archive
/// * `tool` - Which tool's output format to decode
/// * `total_expected` - Expected byte total, 0 when unknown
/// * `config` - Execution settings
/// * `progress_cb` - Callback function for progress updates
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Errors
///
/// Returns an error if:
/// - The tool cannot be started
/// - No entry line was recognised and the destination does not exist
/// - Extraction is cancelled
pub fn extract(
    command: &str,
    tool: Tool,
    total_expected: u64,
    config: &ExecConfig,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractStats, ExecError> {
    extract::extract_archive(command, tool, total_expected, config, progress_cb, cancel_flag)
}
