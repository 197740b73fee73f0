//! Named byte channels between this process and a spawned tool.
//!
//! The streamed path uses a FIFO in the filesystem whose name is unique per
//! invocation. The synchronous fallback path has no live writer and hands
//! the captured output over as an in-memory channel instead.

use crate::error::ExecError;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Read};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts at finding an unused channel name before giving up.
const MAX_CREATE_ATTEMPTS: u32 = 8;

/// Process-wide sequence keeping channel names distinct across invocations.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Something the reader loop can pull bytes from.
pub trait ByteSource {
    /// Read whatever is available.
    ///
    /// `Ok(0)` means "nothing right now" and does not by itself signal the end
    /// of the stream; see [`ByteSource::writer_closed`].
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Block for at most `timeout` until data may be available.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Whether the writer is known to be gone, making a zero-byte read final.
    fn writer_closed(&self) -> bool;

    /// Whether the writer was killed and nothing more should be read.
    fn halted(&self) -> bool {
        false
    }
}

/// Build a channel name from the prefix, the caller's identity and a sequence number.
pub fn channel_name(prefix: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    format!(
        "{}.{}.{:x}.{}",
        prefix,
        std::process::id(),
        thread_tag(),
        seq
    )
}

fn thread_tag() -> u64 {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// A FIFO in the filesystem, removed again on drop.
#[derive(Debug)]
pub struct NamedChannel {
    path: PathBuf,
    removed: bool,
}

impl NamedChannel {
    /// Create a fresh FIFO in `dir` named after `prefix`.
    ///
    /// A leftover entry with the same name (from a run that died before
    /// cleaning up) is removed first.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self, ExecError> {
        let mut last_path = dir.join(prefix);

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let path = dir.join(channel_name(prefix));
            clear_stale(&path);

            match mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "created channel");
                    return Ok(Self {
                        path,
                        removed: false,
                    });
                }
                Err(Errno::EEXIST) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        "channel name collision, trying next name"
                    );
                    last_path = path;
                }
                Err(errno) => {
                    return Err(ExecError::ChannelCreationFailure {
                        path,
                        reason: errno.desc().to_string(),
                    });
                }
            }
        }

        Err(ExecError::ChannelCreationFailure {
            path: last_path,
            reason: format!("no free channel name after {} attempts", MAX_CREATE_ATTEMPTS),
        })
    }

    /// Path of the FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the FIFO is still present.
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|meta| meta.file_type().is_fifo())
            .unwrap_or(false)
    }

    /// Open the writing side handed to the child as its stdout.
    ///
    /// The read end must already be open, otherwise this fails with `ENXIO`.
    /// The handle is write-only, so once the read end is closed the tool gets
    /// `SIGPIPE` instead of blocking on a full pipe. It is switched back to
    /// blocking mode because the child inherits its status flags.
    pub fn open_write_handle(&self) -> io::Result<File> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)?;

        let fd = file.as_raw_fd();
        let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        flags.remove(OFlag::O_NONBLOCK);
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
        Ok(file)
    }

    /// Open the reading side without blocking on a writer.
    pub fn open_reader(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)
    }

    /// Remove the FIFO from the filesystem. Safe to call more than once.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed channel"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove channel"),
        }
    }
}

impl Drop for NamedChannel {
    fn drop(&mut self) {
        self.remove();
    }
}

fn clear_stale(path: &Path) {
    if fs::symlink_metadata(path).is_ok() {
        debug!(path = %path.display(), "removing stale channel");
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove stale channel");
        }
    }
}

/// The read end owned by a controlled process.
#[derive(Debug)]
pub enum Channel {
    /// Non-blocking read end of a FIFO with a live writer
    Fifo(File),
    /// Output captured by a synchronous run
    Captured(Cursor<Vec<u8>>),
}

impl Channel {
    /// Read available bytes.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Fifo(file) => file.read(buf),
            Channel::Captured(cursor) => cursor.read(buf),
        }
    }

    /// Wait up to `timeout` for the channel to become readable.
    ///
    /// A FIFO whose writer hung up reports readiness immediately; in that
    /// case the full timeout is slept so callers counting polls measure time.
    pub fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        match self {
            Channel::Fifo(file) => {
                let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
                let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::from(millis)) {
                    Ok(0) => Ok(false),
                    Ok(_) => {
                        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                        if revents.contains(PollFlags::POLLIN) {
                            Ok(true)
                        } else {
                            thread::sleep(timeout);
                            Ok(false)
                        }
                    }
                    Err(Errno::EINTR) => Ok(false),
                    Err(errno) => Err(errno.into()),
                }
            }
            Channel::Captured(_) => Ok(true),
        }
    }

    /// Whether all captured bytes have been consumed. Always false for a FIFO.
    pub fn is_exhausted(&self) -> bool {
        match self {
            Channel::Fifo(_) => false,
            Channel::Captured(cursor) => cursor.position() >= cursor.get_ref().len() as u64,
        }
    }
}
