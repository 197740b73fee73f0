//! Starting a tool with its stdout bound to a fresh named channel.

use crate::channel::{Channel, NamedChannel};
use crate::control::{spawn_reaper, ControlledProcess, ProcessShared};
use crate::error::ExecError;
use crate::types::ExecConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Cursor};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Output, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause before retrying a failed asynchronous start synchronously.
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Attempts at opening the read end.
const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(60);

/// Launch `command` through the configured shell.
///
/// The tool's stdout is bound to a named channel created for this call
/// only. If the tool cannot be started asynchronously it is run once to
/// completion instead, and its captured output is streamed from memory; the
/// returned handle then has no pid and cannot be signalled.
pub fn launch(command: &str, config: &ExecConfig) -> Result<ControlledProcess, ExecError> {
    config.validate()?;

    debug!(
        command,
        tool = %config.tool_name,
        prefix = %config.pipe_prefix,
        timeout = config.timeout_seconds,
        "launching controlled process"
    );

    let dir = config.channel_dir.clone().unwrap_or_else(std::env::temp_dir);
    let named = NamedChannel::create(&dir, &config.pipe_prefix)?;

    // The read end is opened before the tool runs. A FIFO drops its buffered
    // bytes once no descriptor is left, and the write-only handle below
    // cannot be opened without a reader.
    let reader = open_reader(&named)?;

    let write_handle = named
        .open_write_handle()
        .map_err(|e| ExecError::ChannelCreationFailure {
            path: named.path().to_path_buf(),
            reason: e.to_string(),
        })?;

    narrate!(
        config.silent_mode,
        "Spawning {} process asynchronously",
        config.tool_name
    );

    let child = match spawn_async(command, config, write_handle) {
        Ok(child) => child,
        Err(e) => {
            warn!(command, error = %e, "asynchronous start failed, running synchronously");
            drop(reader);
            drop(named);
            return launch_sync(command, config);
        }
    };

    let pid = child.id();
    let shared = Arc::new(ProcessShared::spawned(&config.tool_name, pid));
    if let Err(e) = spawn_reaper(Arc::clone(&shared), child) {
        // Without a reaper nobody would notice the child dying
        let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
        return Err(ExecError::Io(e));
    }
    debug!(pid, "child started");

    narrate!(
        config.silent_mode,
        "Started {} process with real-time monitoring",
        config.tool_name
    );

    Ok(ControlledProcess::new(
        command,
        config,
        Channel::Fifo(reader),
        Some(named),
        shared,
    ))
}

/// Build the shell invocation for `command`.
pub(crate) fn shell_command(command: &str, config: &ExecConfig) -> Command {
    let mut cmd = Command::new(&config.shell);
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}

fn spawn_async(command: &str, config: &ExecConfig, write_handle: File) -> io::Result<Child> {
    let stderr = if config.merge_stderr {
        Stdio::from(write_handle.try_clone()?)
    } else if config.silent_mode {
        Stdio::null()
    } else {
        Stdio::inherit()
    };

    let mut cmd = shell_command(command, config);
    cmd.stdout(Stdio::from(write_handle))
        .stderr(stderr)
        .process_group(0);

    // `cmd` owns our copy of the write handle and closes it when dropped, so
    // the child holds the only writer
    cmd.spawn()
}

fn launch_sync(command: &str, config: &ExecConfig) -> Result<ControlledProcess, ExecError> {
    thread::sleep(SYNC_RETRY_DELAY);

    let output = run_sync(command, config).map_err(|source| ExecError::SpawnFailure {
        command: command.to_string(),
        source,
    })?;

    narrate!(
        config.silent_mode,
        "Started {} process synchronously",
        config.tool_name
    );
    debug!(status = %output.status, bytes = output.stdout.len(), "synchronous run finished");

    let mut captured = output.stdout;
    if config.merge_stderr {
        captured.extend_from_slice(&output.stderr);
    }

    let shared = Arc::new(ProcessShared::finished(&config.tool_name, output.status));
    let mut process = ControlledProcess::new(
        command,
        config,
        Channel::Captured(Cursor::new(captured)),
        None,
        shared,
    );
    process.exit_code = output.status.code();
    Ok(process)
}

fn run_sync(command: &str, config: &ExecConfig) -> io::Result<Output> {
    let stderr = if config.merge_stderr {
        Stdio::piped()
    } else if config.silent_mode {
        Stdio::null()
    } else {
        Stdio::inherit()
    };

    shell_command(command, config)
        .stdout(Stdio::piped())
        .stderr(stderr)
        .output()
}

fn open_reader(named: &NamedChannel) -> Result<File, ExecError> {
    for attempt in 1..=OPEN_ATTEMPTS {
        match named.open_reader() {
            Ok(file) => {
                debug!(attempt, path = %named.path().display(), "opened channel for reading");
                return Ok(file);
            }
            Err(e) => {
                debug!(attempt, error = %e, "channel open failed");
                if attempt < OPEN_ATTEMPTS {
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }
    Err(ExecError::ChannelOpenTimeout {
        path: named.path().to_path_buf(),
        attempts: OPEN_ATTEMPTS,
    })
}
