// pilink-camera/src/utility.rs
use crate::{CameraError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;
use std::io;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

/// Captured result of one utility invocation.
#[derive(Debug, Clone, Default)]
pub struct UtilityOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Black-box camera-control program, invoked with plain arguments.
///
/// Calls block; the hardware worker is the only caller in production.
pub trait CameraUtility: Send + 'static {
    fn run(&self, args: &[&str], timeout: Option<Duration>) -> Result<UtilityOutput>;
}

/// The real `gphoto2` binary (or any drop-in with the same CLI).
#[derive(Debug, Clone)]
pub struct Gphoto2 {
    program: String,
}

impl Default for Gphoto2 {
    fn default() -> Self {
        Self::new("gphoto2")
    }
}

impl Gphoto2 {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl CameraUtility for Gphoto2 {
    fn run(&self, args: &[&str], timeout: Option<Duration>) -> Result<UtilityOutput> {
        debug!("{} {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CameraError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = match timeout {
            None => child.wait_with_output()?,
            Some(timeout) => {
                // wait_with_output drains both pipes; run it off-thread so the
                // deadline can still fire while it blocks.
                let pid = child.id() as libc::pid_t;
                let (tx, rx) = crossbeam_channel::bounded(1);
                std::thread::spawn(move || {
                    let _ = tx.send(child.wait_with_output());
                });
                wait_output(&self.program, &rx, timeout, || {
                    // SAFETY: pid belongs to a child we spawned and have not reaped.
                    unsafe { libc::kill(pid, libc::SIGKILL) };
                })?
            }
        };

        Ok(UtilityOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Wait for the waiter thread's result; `on_timeout` runs only when the
/// deadline passes with the child still running.
fn wait_output(
    program: &str,
    rx: &Receiver<io::Result<Output>>,
    timeout: Duration,
    on_timeout: impl FnOnce(),
) -> Result<Output> {
    match rx.recv_timeout(timeout) {
        Ok(output) => Ok(output?),
        Err(RecvTimeoutError::Timeout) => {
            on_timeout();
            Err(CameraError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(CameraError::Io(io::Error::other(format!(
            "lost the output of `{program}`: waiter thread exited"
        )))),
    }
}
