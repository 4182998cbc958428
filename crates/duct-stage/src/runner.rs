//! Executing stage commands.

use std::io;
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{StageError, StageResult};
use crate::stage::Stage;

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of everything watching this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a stage's command.
///
/// `dir` is the resolved working directory. Implementations must block until
/// the command has finished and report a non-zero exit as
/// [`StageError::CommandFailed`].
pub trait Runner: Send + Sync {
    fn run(&self, stage_path: &str, stage: &Stage, dir: &Path) -> StageResult<()>;
}

/// Runs commands through the user's shell as child processes.
///
/// The child is polled rather than waited on so a cancelled token can kill
/// it; a cancelled run never leaves the subprocess behind.
#[derive(Clone, Debug)]
pub struct ShellRunner {
    cancel: CancelToken,
    poll_interval: Duration,
}

impl ShellRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Runner for ShellRunner {
    fn run(&self, stage_path: &str, stage: &Stage, dir: &Path) -> StageResult<()> {
        let Some(mut cmd) = stage.create_command(dir) else {
            debug!(stage = stage_path, "no command");
            return Ok(());
        };
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled {
                stage: stage_path.to_string(),
            });
        }

        // Own process group, so cancellation reaches every process the
        // shell started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        info!(stage = stage_path, dir = %dir.display(), "running command");
        let mut child = cmd.spawn().map_err(|source| StageError::Io {
            op: "spawn command",
            path: dir.to_path_buf(),
            source,
        })?;
        let wait_err = |source| StageError::Io {
            op: "wait for command",
            path: dir.to_path_buf(),
            source,
        };

        loop {
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                return if status.success() {
                    Ok(())
                } else {
                    Err(StageError::CommandFailed {
                        stage: stage_path.to_string(),
                        status: status.to_string(),
                    })
                };
            }
            if self.cancel.is_cancelled() {
                warn!(stage = stage_path, pid = child.id(), "cancelled; killing command");
                if let Err(err) = kill_tree(&mut child) {
                    warn!(stage = stage_path, error = %err, "failed to kill command");
                }
                child.wait().map_err(wait_err)?;
                return Err(StageError::Cancelled {
                    stage: stage_path.to_string(),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Kill the child and, on unix, the rest of its process group.
fn kill_tree(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // The child leads its own group, so its pid is the group id.
        match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            Ok(()) => return Ok(()),
            Err(errno) => debug!(pid = child.id(), error = %errno, "killpg failed; killing child only"),
        }
    }
    child.kill()
}
