// pilink-camera/src/capture.rs
use crate::{CameraError, Result};
use log::{debug, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};

// how long a SIGTERM'd capture process gets before SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Continuous-capture subprocess writing a motion stream to stdout.
///
/// Dropping the handle kills the process (SIGKILL), so an aborted task
/// never leaves it behind; [`LiveCapture::terminate`] is the orderly path.
pub struct LiveCapture {
    child: Child,
}

impl LiveCapture {
    /// Spawn `command[0]` with the remaining elements as arguments.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or(CameraError::EmptyCommand)?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CameraError::Spawn {
                program: program.clone(),
                source,
            })?;
        debug!("[liveview] started {program} (pid {:?})", child.id());
        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// The motion stream. Only the first call returns it.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// SIGTERM, wait briefly, then SIGKILL; always reaps the process.
    pub async fn terminate(mut self) -> Result<ExitStatus> {
        if let Some(pid) = self.child.id() {
            // SAFETY: the child has not been reaped, so pid still names it.
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            match tokio::time::timeout(TERM_GRACE, self.child.wait()).await {
                Ok(status) => return Ok(status?),
                Err(_) => warn!("[liveview] pid {pid} ignored SIGTERM, killing"),
            }
        }
        self.child.kill().await.ok();
        Ok(self.child.wait().await?)
    }
}
