//! Handle to a launched tool: streaming its output and signalling it.

use crate::channel::{ByteSource, Channel, NamedChannel};
use crate::error::ExecError;
use crate::reader::read_stream;
use crate::types::{ExecConfig, LineControl, StreamEnd, StreamOutcome};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub(crate) enum ExitState {
    Running,
    Exited(ExitStatus),
    /// The child was reaped but its status could not be collected
    Lost,
}

/// State shared between the owning handle, its controllers and the reaper.
#[derive(Debug)]
pub(crate) struct ProcessShared {
    name: String,
    /// Process group id of the child; 0 when unknown or cleared
    pid: AtomicI32,
    running: AtomicBool,
    /// Last terminating signal sent through a handle; 0 when none was sent
    stop_signal: AtomicI32,
    exit: Mutex<ExitState>,
    death: Condvar,
}

impl ProcessShared {
    /// State for a child that was spawned and is being reaped in the background.
    pub(crate) fn spawned(name: &str, pid: u32) -> Self {
        Self {
            name: name.to_string(),
            pid: AtomicI32::new(i32::try_from(pid).unwrap_or(0)),
            running: AtomicBool::new(true),
            stop_signal: AtomicI32::new(0),
            exit: Mutex::new(ExitState::Running),
            death: Condvar::new(),
        }
    }

    /// State for a run that already finished synchronously.
    pub(crate) fn finished(name: &str, status: ExitStatus) -> Self {
        Self {
            name: name.to_string(),
            pid: AtomicI32::new(0),
            running: AtomicBool::new(false),
            stop_signal: AtomicI32::new(0),
            exit: Mutex::new(ExitState::Exited(status)),
            death: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<Pid> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    fn record(&self, state: ExitState) {
        let mut exit = self.exit.lock();
        *exit = state;
        self.running.store(false, Ordering::Release);
        self.death.notify_all();
    }

    /// Whether terminate or force-kill was sent through a handle.
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire) != 0
    }

    pub(crate) fn was_force_killed(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire) == Signal::SIGKILL as i32
    }

    pub(crate) fn has_exited(&self) -> bool {
        !matches!(*self.exit.lock(), ExitState::Running)
    }

    pub(crate) fn exit_status(&self) -> Option<ExitStatus> {
        match *self.exit.lock() {
            ExitState::Exited(status) => Some(status),
            _ => None,
        }
    }

    pub(crate) fn wait_for_death(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut exit = self.exit.lock();

        while matches!(*exit, ExitState::Running) {
            match deadline {
                Some(deadline) => {
                    if self.death.wait_until(&mut exit, deadline).timed_out() {
                        break;
                    }
                }
                None => self.death.wait(&mut exit),
            }
        }

        let dead = !matches!(*exit, ExitState::Running);
        drop(exit);
        if dead {
            self.running.store(false, Ordering::Release);
        }
        dead
    }

    fn clear(&self) {
        self.pid.store(0, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Move `child` to a background thread that waits for it and records its status.
pub(crate) fn spawn_reaper(shared: Arc<ProcessShared>, mut child: Child) -> io::Result<()> {
    let thread_name = format!("{}-reaper", shared.name());
    thread::Builder::new().name(thread_name).spawn(move || {
        match child.wait() {
            Ok(status) => {
                debug!(process = shared.name(), status = %status, "child exited");
                shared.record(ExitState::Exited(status));
            }
            Err(e) => {
                warn!(process = shared.name(), error = %e, "failed to collect child status");
                shared.record(ExitState::Lost);
            }
        }
    })?;
    Ok(())
}

/// Cloneable handle for signalling a running tool from any thread.
///
/// Obtained from [`ControlledProcess::controller`]. A controller may be used
/// from inside the line sink while the owning handle is streaming, or handed
/// to a supervising thread.
#[derive(Debug, Clone)]
pub struct ProcessController {
    shared: Arc<ProcessShared>,
}

impl ProcessController {
    /// Label of the process.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Process id of the child, if one is known.
    pub fn pid(&self) -> Option<u32> {
        self.shared.pid().and_then(|pid| u32::try_from(pid.as_raw()).ok())
    }

    /// Whether the child is believed to be running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Suspend the child.
    pub fn pause(&self) -> Result<(), ExecError> {
        self.send(Signal::SIGSTOP, "paused")
    }

    /// Continue a suspended child.
    pub fn resume(&self) -> Result<(), ExecError> {
        self.send(Signal::SIGCONT, "resumed")
    }

    /// Ask the child to terminate.
    ///
    /// A suspended child only acts on this once resumed.
    pub fn terminate(&self) -> Result<(), ExecError> {
        self.send(Signal::SIGTERM, "terminated")
    }

    /// Kill the child unconditionally.
    pub fn force_kill(&self) -> Result<(), ExecError> {
        self.send(Signal::SIGKILL, "force killed")?;
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    /// Wait until the child has died, or until `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns whether death was observed.
    pub fn wait_for_death(&self, timeout: Option<Duration>) -> bool {
        self.shared.wait_for_death(timeout)
    }

    fn send(&self, signal: Signal, action: &str) -> Result<(), ExecError> {
        let pid = self
            .shared
            .pid()
            .ok_or_else(|| ExecError::SignalTargetUnknown(self.shared.name().to_string()))?;
        if !self.is_running() {
            return Err(ExecError::NotRunning(self.shared.name().to_string()));
        }

        // Recorded before delivery so a reader woken by the death sees it
        let stops = matches!(signal, Signal::SIGTERM | Signal::SIGKILL);
        let previous = if stops {
            self.shared.stop_signal.swap(signal as i32, Ordering::AcqRel)
        } else {
            0
        };

        // The child leads its own process group; signal all of it so the
        // tool behind the shell is reached too
        if let Err(source) = kill(Pid::from_raw(-pid.as_raw()), signal) {
            if stops {
                self.shared.stop_signal.store(previous, Ordering::Release);
            }
            return Err(ExecError::SignalFailed {
                name: self.shared.name().to_string(),
                signal: signal.as_str().to_string(),
                source,
            });
        }

        info!(process = self.shared.name(), pid = pid.as_raw(), "process {}", action);
        Ok(())
    }
}

/// A launched tool together with the read end of its output channel.
///
/// Created by [`crate::launch`]. Dropping the handle releases the channel but
/// does not stop the tool; call [`ControlledProcess::terminate`] first if
/// that is wanted.
#[derive(Debug)]
pub struct ControlledProcess {
    pub(crate) command: String,
    pub(crate) config: ExecConfig,
    pub(crate) channel: Option<Channel>,
    pub(crate) named: Option<NamedChannel>,
    pub(crate) shared: Arc<ProcessShared>,
    pub(crate) exit_code: Option<i32>,
}

impl ControlledProcess {
    pub(crate) fn new(
        command: &str,
        config: &ExecConfig,
        channel: Channel,
        named: Option<NamedChannel>,
        shared: Arc<ProcessShared>,
    ) -> Self {
        Self {
            command: command.to_string(),
            config: config.clone(),
            channel: Some(channel),
            named,
            shared,
            exit_code: None,
        }
    }

    /// Label of the process.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// The command string as launched.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Configuration the process was launched with.
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Path of the named channel, when the tool runs asynchronously.
    pub fn channel_path(&self) -> Option<&Path> {
        self.named.as_ref().map(NamedChannel::path)
    }

    /// A handle for signalling this process from elsewhere.
    pub fn controller(&self) -> ProcessController {
        ProcessController {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Process id of the child, if one is known.
    pub fn pid(&self) -> Option<u32> {
        self.controller().pid()
    }

    /// Whether the child is believed to be running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// See [`ProcessController::pause`].
    pub fn pause(&self) -> Result<(), ExecError> {
        self.controller().pause()
    }

    /// See [`ProcessController::resume`].
    pub fn resume(&self) -> Result<(), ExecError> {
        self.controller().resume()
    }

    /// See [`ProcessController::terminate`].
    pub fn terminate(&self) -> Result<(), ExecError> {
        self.controller().terminate()
    }

    /// See [`ProcessController::force_kill`].
    pub fn force_kill(&self) -> Result<(), ExecError> {
        self.controller().force_kill()
    }

    /// See [`ProcessController::wait_for_death`].
    pub fn wait_for_death(&self, timeout: Option<Duration>) -> bool {
        self.shared.wait_for_death(timeout)
    }

    /// Run the reader loop over the tool's output.
    ///
    /// On a cancelled stream the tool is asked to terminate. An idle timeout
    /// leaves the tool alone.
    pub fn stream<F>(
        &mut self,
        cancel_flag: &AtomicBool,
        sink: F,
    ) -> Result<StreamOutcome, ExecError>
    where
        F: FnMut(&str) -> LineControl,
    {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ExecError::NotRunning(self.shared.name().to_string()))?;

        narrate!(self.config.silent_mode, "Starting real-time {} monitoring", self.shared.name());

        let mut source = ProcessStream {
            channel,
            shared: &self.shared,
        };
        let outcome = read_stream(&mut source, &self.config, cancel_flag, sink);

        match outcome.end {
            StreamEnd::Eof => self.shared.running.store(false, Ordering::Release),
            StreamEnd::Cancelled => {
                if self.is_running() {
                    if let Err(e) = self.terminate() {
                        debug!(error = %e, "terminate after cancellation failed");
                    }
                }
                self.shared.running.store(false, Ordering::Release);
            }
            StreamEnd::IdleTimeout | StreamEnd::LineLimit => {}
        }

        narrate!(
            self.config.silent_mode,
            "Real-time streaming completed - processed {} lines",
            outcome.lines
        );
        Ok(outcome)
    }

    /// Release the channel and forget the child. Safe to call repeatedly.
    ///
    /// A tool still writing gets `SIGPIPE` on its next write once the read
    /// end is gone. A paused tool is continued first so it can notice.
    pub fn cleanup(&mut self) {
        if self.channel.is_none() && self.named.is_none() {
            return;
        }
        debug!(process = self.shared.name(), "cleaning up controlled process");

        self.channel = None;
        if self.shared.pid().is_some() && !self.shared.has_exited() {
            if let Err(e) = self.resume() {
                debug!(error = %e, "continue before release failed");
            }
        }
        if let Some(mut named) = self.named.take() {
            named.remove();
        }
        self.shared.clear();
    }
}

impl Drop for ControlledProcess {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// The channel of a live process viewed as a byte source.
struct ProcessStream<'a> {
    channel: &'a mut Channel,
    shared: &'a ProcessShared,
}

impl ByteSource for ProcessStream<'_> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read_chunk(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        self.channel.wait_readable(timeout)
    }

    fn writer_closed(&self) -> bool {
        match &*self.channel {
            channel @ Channel::Captured(_) => channel.is_exhausted(),
            Channel::Fifo(_) => self.shared.has_exited(),
        }
    }

    fn halted(&self) -> bool {
        self.shared.was_force_killed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_finished_process_is_not_signallable() {
        let shared = Arc::new(ProcessShared::finished("sync", ExitStatus::from_raw(0)));
        let controller = ProcessController { shared };

        assert!(!controller.is_running());
        assert_eq!(controller.pid(), None);
        assert!(matches!(controller.pause(), Err(ExecError::SignalTargetUnknown(_))));
        assert!(matches!(controller.force_kill(), Err(ExecError::SignalTargetUnknown(_))));
        assert!(controller.wait_for_death(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_stopped_process_is_not_signalled() {
        let shared = Arc::new(ProcessShared::spawned("gone", 999_999));
        shared.record(ExitState::Exited(ExitStatus::from_raw(0)));
        let controller = ProcessController { shared };

        assert!(matches!(controller.terminate(), Err(ExecError::NotRunning(_))));
    }

    #[test]
    fn test_wait_for_death_times_out_then_observes_exit() {
        let shared = Arc::new(ProcessShared::spawned("waiter", 999_999));
        assert!(!shared.wait_for_death(Some(Duration::from_millis(20))));

        let notifier = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            notifier.record(ExitState::Exited(ExitStatus::from_raw(3 << 8)));
        });

        assert!(shared.wait_for_death(None));
        handle.join().unwrap();
        assert_eq!(shared.exit_status().and_then(|s| s.code()), Some(3));
        assert!(!shared.running.load(Ordering::Acquire));
    }

    #[test]
    fn test_clear_forgets_target() {
        let shared = ProcessShared::spawned("c", 4242);
        assert!(shared.pid().is_some());
        shared.clear();
        assert!(shared.pid().is_none());
        assert!(!shared.running.load(Ordering::Acquire));
    }
}
