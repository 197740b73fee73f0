//! Type definitions for controlled execution and progress tracking.

use crate::error::ExecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// External archiver whose console output is understood by the decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// LhA / lha
    Lha,
    /// Info-ZIP unzip
    Unzip,
}

impl Tool {
    /// Label used for narration and channel naming.
    pub fn label(self) -> &'static str {
        match self {
            Tool::Lha => "LhA",
            Tool::Unzip => "unzip",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which kind of invocation a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Listing archive contents
    List,
    /// Extracting archive contents
    Extract,
}

/// Fixed phrases a wrapped tool prints on completion or failure.
///
/// Matching is a case-sensitive substring search. The wording belongs to the
/// wrapped tool, so the lists are data rather than code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseSet {
    /// Phrases meaning the operation finished
    pub completion: Vec<String>,

    /// Phrases introducing a tool-reported error
    pub error: Vec<String>,
}

impl PhraseSet {
    /// Default vocabulary for a tool and operation.
    pub fn for_tool(tool: Tool, operation: Operation) -> Self {
        let owned =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| (*s).to_string()).collect() };
        match (tool, operation) {
            (Tool::Lha, Operation::List) => Self {
                completion: owned(&[
                    "Operation successful",
                    "operation successful",
                    "Done",
                    "Complete",
                    "finished",
                ]),
                error: owned(&["*** Error", "Unable to open"]),
            },
            (Tool::Lha, Operation::Extract) => Self {
                completion: owned(&[
                    "files extracted",
                    "all files OK",
                    "Done",
                    "Complete",
                    "Operation successful",
                ]),
                error: owned(&["*** Error", "Unable to open"]),
            },
            (Tool::Unzip, _) => Self {
                completion: Vec::new(),
                error: owned(&["error:", "cannot find"]),
            },
        }
    }

    /// First completion phrase contained in `line`, if any.
    pub fn completion_in(&self, line: &str) -> Option<&str> {
        self.completion
            .iter()
            .map(String::as_str)
            .find(|phrase| line.contains(phrase))
    }

    /// First error phrase contained in `line`, if any.
    pub fn error_in(&self, line: &str) -> Option<&str> {
        self.error
            .iter()
            .map(String::as_str)
            .find(|phrase| line.contains(phrase))
    }
}

/// How the completion code of a streamed run is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCodePolicy {
    /// Only use the status reported by the spawned child
    #[default]
    FromChild,

    /// Re-run the command with output discarded when the child reported no code.
    /// Only safe for idempotent commands.
    RerunIfUnknown,
}

/// Configuration for one controlled invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Tool label for narration and debugging
    pub tool_name: String,

    /// Prefix that keeps channel names unique per tool
    pub pipe_prefix: String,

    /// Idle-read budget in seconds
    pub timeout_seconds: u32,

    /// Suppress console narration
    pub silent_mode: bool,

    /// Poll frequency while waiting for data
    pub polls_per_second: u32,

    /// Longest partial line kept before a forced flush, in bytes
    pub line_capacity: usize,

    /// Size of a single channel read, in bytes
    pub read_chunk_size: usize,

    /// Shell used to interpret the command string
    pub shell: PathBuf,

    /// Directory holding the named channel (default: OS temp dir)
    pub channel_dir: Option<PathBuf>,

    /// Send the tool's stderr into the channel as well
    pub merge_stderr: bool,

    /// Bytes credited per entry when the tool reports no size
    pub estimated_entry_size: u64,

    /// How the exit code is resolved
    pub exit_code_policy: ExitCodePolicy,

    /// Upper bound on delivered lines for one invocation
    pub max_lines: u64,

    /// Phrase vocabulary override (default: per-tool vocabulary)
    pub phrases: Option<PhraseSet>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            tool_name: "Command".to_string(),
            pipe_prefix: "cmd_pipe".to_string(),
            timeout_seconds: 2,
            silent_mode: false,
            polls_per_second: 25,
            line_capacity: 512,
            read_chunk_size: 4096,
            shell: PathBuf::from("/bin/sh"),
            channel_dir: None,
            merge_stderr: false,
            estimated_entry_size: 4000,
            exit_code_policy: ExitCodePolicy::FromChild,
            max_lines: 100_000,
            phrases: None,
        }
    }
}

impl ExecConfig {
    /// Preset for a tool and operation.
    pub fn for_tool(tool: Tool, operation: Operation) -> Self {
        let (pipe_prefix, timeout_seconds) = match (tool, operation) {
            (Tool::Lha, Operation::List) => ("lha_list", 30),
            (Tool::Lha, Operation::Extract) => ("lha_extract", 60),
            (Tool::Unzip, Operation::List) => ("unzip_pipe", 3),
            (Tool::Unzip, Operation::Extract) => ("unzip_pipe", 5),
        };

        Self {
            tool_name: tool.label().to_string(),
            pipe_prefix: pipe_prefix.to_string(),
            timeout_seconds,
            ..Self::default()
        }
    }

    /// Reject settings the reader loop cannot work with.
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.polls_per_second == 0 {
            return Err(ExecError::InvalidConfig(
                "polls_per_second must be greater than zero".to_string(),
            ));
        }
        if self.line_capacity == 0 {
            return Err(ExecError::InvalidConfig(
                "line_capacity must be greater than zero".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(ExecError::InvalidConfig(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.pipe_prefix.is_empty() || self.pipe_prefix.contains('/') {
            return Err(ExecError::InvalidConfig(format!(
                "pipe_prefix '{}' is not a valid file name",
                self.pipe_prefix
            )));
        }
        Ok(())
    }

    /// Consecutive empty polls tolerated before the stream is presumed finished.
    pub fn idle_budget(&self) -> u32 {
        self.timeout_seconds
            .max(1)
            .saturating_mul(self.polls_per_second.max(1))
    }

    /// Time spent in one wait-for-data call.
    pub fn poll_interval(&self) -> Duration {
        let millis = 1000 / u64::from(self.polls_per_second.max(1));
        Duration::from_millis(millis.max(1))
    }

    /// Phrases in effect for a tool and operation.
    pub fn phrases_for(&self, tool: Tool, operation: Operation) -> PhraseSet {
        self.phrases
            .clone()
            .unwrap_or_else(|| PhraseSet::for_tool(tool, operation))
    }
}

/// What the line sink wants the reader loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    /// Keep reading
    Continue,
    /// Stop reading; the invocation is cancelled
    Stop,
}

impl From<bool> for LineControl {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            LineControl::Continue
        } else {
            LineControl::Stop
        }
    }
}

/// Why the reader loop finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    /// The writer closed the channel
    Eof,
    /// The sink or the cancel flag stopped the loop
    Cancelled,
    /// No data arrived within the idle budget
    IdleTimeout,
    /// The configured line limit was reached
    LineLimit,
}

impl StreamEnd {
    /// Whether the stream ran to a natural end rather than being stopped.
    pub fn is_complete(self) -> bool {
        matches!(self, StreamEnd::Eof | StreamEnd::IdleTimeout)
    }
}

/// Summary of one run of the reader loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutcome {
    /// How the loop ended
    pub end: StreamEnd,

    /// Lines delivered to the sink
    pub lines: u64,

    /// Raw bytes read from the channel
    pub bytes: u64,

    /// Read attempts made
    pub reads: u64,
}

/// Result of [`crate::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Reader loop summary
    pub stream: StreamOutcome,

    /// Exit code of the tool, if it could be resolved
    pub exit_code: Option<i32>,
}

/// Running totals for a list invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListProgress {
    /// Sum of entry sizes in bytes
    pub total_size: u64,

    /// Entries seen
    pub file_count: u64,

    /// A completion phrase was seen
    pub completion_detected: bool,

    /// An error phrase was seen
    pub error_detected: bool,
}

impl ListProgress {
    /// Account for one listed entry.
    pub fn record(&mut self, size: u64) {
        self.total_size = self.total_size.saturating_add(size);
        self.file_count += 1;
    }
}

/// Running totals for an extract invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractProgress {
    /// Bytes the caller expects in total (usually from a prior list)
    pub total_expected: u64,

    /// Bytes extracted so far
    pub cumulative_bytes: u64,

    /// Entries extracted so far
    pub file_count: u64,

    /// Tenths of a percent at the last reported milestone
    pub last_percentage_x10: u32,

    /// A completion phrase was seen
    pub completion_detected: bool,

    /// An error phrase was seen
    pub error_detected: bool,
}

impl ExtractProgress {
    /// Fresh state for an extraction of `total_expected` bytes.
    pub fn new(total_expected: u64) -> Self {
        Self {
            total_expected,
            ..Self::default()
        }
    }

    /// Account for one extracted entry.
    ///
    /// Returns the new tenths-of-a-percent value when it advanced past the last
    /// reported milestone.
    pub fn record(&mut self, size: u64) -> Option<u32> {
        self.cumulative_bytes = self.cumulative_bytes.saturating_add(size);
        self.file_count += 1;

        let current = self.percentage_x10()?;
        if current > self.last_percentage_x10 {
            self.last_percentage_x10 = current;
            Some(current)
        } else {
            None
        }
    }

    /// `cumulative * 1000 / expected`, or `None` without an expected total.
    ///
    /// May exceed 1000 when the tool's sizes are inconsistent with the total.
    pub fn percentage_x10(&self) -> Option<u32> {
        percentage_x10(self.cumulative_bytes, self.total_expected)
    }
}

/// Integer percentage with one implied decimal place.
pub fn percentage_x10(cumulative: u64, expected: u64) -> Option<u32> {
    if expected == 0 {
        return None;
    }
    let value = u128::from(cumulative) * 1000 / u128::from(expected);
    Some(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Render a tenths-of-a-percent value as `12.3%`.
pub fn format_percentage(percentage_x10: u32) -> String {
    format!("{}.{}%", percentage_x10 / 10, percentage_x10 % 10)
}

/// Structured progress reported to a [`crate::ProgressCallback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A list line was decoded
    Listed {
        /// Entry size in bytes
        size: u64,
        /// Entries seen so far
        file_count: u64,
        /// Running total size
        total_size: u64,
    },

    /// An extract line was decoded
    Extracted {
        /// Entry name as printed by the tool
        filename: String,
        /// Bytes credited for this entry
        size: u64,
        /// Entries extracted so far
        file_count: u64,
        /// Running byte count
        cumulative_bytes: u64,
        /// Progress against the expected total, if one was given
        percentage_x10: Option<u32>,
    },

    /// Extraction progress crossed into a new tenth of a percent
    Milestone {
        /// New tenths-of-a-percent value
        percentage_x10: u32,
    },

    /// The tool printed a completion phrase
    Completed {
        /// The line that contained it
        line: String,
    },

    /// The tool printed an error phrase
    ToolError {
        /// The line that contained it
        line: String,
    },
}

/// Statistics about a completed list invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListStats {
    /// Sum of listed entry sizes in bytes
    pub total_size: u64,

    /// Number of listed entries
    pub file_count: u64,

    /// A completion phrase was seen
    pub completion_detected: bool,

    /// An error phrase was seen
    pub error_detected: bool,

    /// Reader loop summary
    pub stream: StreamOutcome,

    /// Exit code of the tool, if resolved
    pub exit_code: Option<i32>,

    /// Wall-clock duration (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Statistics about a completed extract invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of entries reported as extracted
    pub files_extracted: u64,

    /// Bytes credited across all entries
    pub bytes_extracted: u64,

    /// Expected total supplied by the caller
    pub total_expected: u64,

    /// Final progress in tenths of a percent, if a total was given
    pub percentage_x10: Option<u32>,

    /// A completion phrase was seen
    pub completion_detected: bool,

    /// An error phrase was seen
    pub error_detected: bool,

    /// Success was inferred from the destination existing rather than from output
    pub destination_fallback: bool,

    /// Reader loop summary
    pub stream: StreamOutcome,

    /// Exit code of the tool, if resolved
    pub exit_code: Option<i32>,

    /// Wall-clock duration (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
