//! Resolution of a streamed tool's completion code.

use crate::control::ControlledProcess;
use crate::error::ExecError;
use crate::launch::shell_command;
use crate::types::{ExecConfig, ExitCodePolicy};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to wait for a child that outlived its output stream.
const EXIT_WAIT: Duration = Duration::from_secs(2);

impl ControlledProcess {
    /// Exit code, if it has already been resolved.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Determine the tool's exit code.
    ///
    /// Uses the status collected when the child was reaped, waiting briefly
    /// if the child is still alive. A child that ended without a code has
    /// its command run again with output discarded under
    /// [`ExitCodePolicy::RerunIfUnknown`]. That never happens while the
    /// first run is alive, nor after it was stopped through this handle;
    /// those cases report [`ExecError::ExitCodeUnavailable`]. A resolved code
    /// is cached.
    pub fn resolve_exit_code(&mut self) -> Result<i32, ExecError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        if !self.shared.has_exited() && !self.shared.wait_for_death(Some(EXIT_WAIT)) {
            debug!(process = self.name(), "child still running, exit code not yet known");
            return Err(ExecError::ExitCodeUnavailable(self.name().to_string()));
        }

        let mut code = None;
        if let Some(status) = self.shared.exit_status() {
            code = status.code();
            if let Some(signal) = status.signal() {
                debug!(process = self.name(), signal, "child ended by signal");
            }
        }

        if code.is_none() && self.config.exit_code_policy == ExitCodePolicy::RerunIfUnknown {
            if self.shared.stop_requested() {
                debug!(process = self.name(), "stopped through its handle, not re-running");
            } else {
                code = rerun_for_exit_code(&self.command, &self.config);
            }
        }

        let code = code.ok_or_else(|| ExecError::ExitCodeUnavailable(self.name().to_string()))?;
        if code != 0 {
            warn!(process = self.name(), code, "tool exited with non-zero status");
        }
        self.exit_code = Some(code);
        Ok(code)
    }
}

/// Run `command` to completion with all output discarded and return its exit code.
pub fn rerun_for_exit_code(command: &str, config: &ExecConfig) -> Option<i32> {
    debug!(command, "re-running command to obtain exit code");
    match shell_command(command, config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(command, error = %e, "re-run for exit code failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerun_reports_code() {
        let config = ExecConfig::default();
        assert_eq!(rerun_for_exit_code("exit 7", &config), Some(7));
        assert_eq!(rerun_for_exit_code("true", &config), Some(0));
    }

    #[test]
    fn test_rerun_without_shell() {
        let config = ExecConfig {
            shell: "/nonexistent/shell".into(),
            ..ExecConfig::default()
        };
        assert_eq!(rerun_for_exit_code("true", &config), None);
    }
}
