//! Error types for controlled process execution.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for launching, streaming and controlling a wrapped tool.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The named channel could not be created (collision or exhaustion).
    #[error("Channel creation failed for {path}: {reason}")]
    ChannelCreationFailure {
        /// Path of the channel that could not be created
        path: PathBuf,
        /// Host-level reason
        reason: String,
    },

    /// Neither the asynchronous nor the synchronous launch started the tool.
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailure {
        /// Command that was being started
        command: String,
        /// Error from the last launch attempt
        #[source]
        source: std::io::Error,
    },

    /// The read side of the channel never became available.
    #[error("Channel {path} could not be opened for reading after {attempts} attempts")]
    ChannelOpenTimeout {
        /// Path of the channel
        path: PathBuf,
        /// Number of open attempts made
        attempts: u32,
    },

    /// A read from the channel failed. Retried by the reader loop.
    #[error("Read failure: {0}")]
    ReadFailure(#[source] std::io::Error),

    /// No data arrived within the idle budget. Treated as a benign end of stream.
    #[error("No output within {polls} polls")]
    IdleTimeout {
        /// Polls spent waiting
        polls: u32,
    },

    /// A line exceeded the reassembly buffer. Handled by a forced flush.
    #[error("Line exceeded {capacity} bytes")]
    LineOverflow {
        /// Configured line capacity
        capacity: usize,
    },

    /// The completion code of the tool could not be determined.
    #[error("Exit code unavailable for {0}")]
    ExitCodeUnavailable(String),

    /// A control operation was attempted without a known child handle.
    #[error("No signal target known for {0}")]
    SignalTargetUnknown(String),

    /// A control operation was attempted after the process stopped running.
    #[error("Process {0} is not running")]
    NotRunning(String),

    /// Delivering a signal to the child failed at the OS level.
    #[error("Failed to deliver {signal} to {name}: {source}")]
    SignalFailed {
        /// Process label
        name: String,
        /// Signal that was being sent
        signal: String,
        /// OS error
        #[source]
        source: nix::errno::Errno,
    },

    /// The stream ended without a single recognised progress line.
    #[error("{tool} produced no recognised output")]
    NoProgress {
        /// Tool label
        tool: String,
    },

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred outside the retried read path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled by the caller.
    #[error("Cancelled by user")]
    Cancelled,
}
