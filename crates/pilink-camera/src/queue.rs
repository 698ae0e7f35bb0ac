// pilink-camera/src/queue.rs
// ============================================================
// Hardware access queue: one OS thread owns the Camera and
// executes jobs strictly in FIFO order, so no two utility
// invocations ever overlap. Async callers await a oneshot
// reply; fire-and-forget DeviceRequests only log.
// ============================================================

use crate::{Camera, CameraError, CameraUtility, Result, SettingsMap};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// Apply `settings`, then capture into `folder`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequest {
    pub folder: PathBuf,
    pub settings: BTreeMap<String, String>,
}

/// Result of the startup health check.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProbe {
    pub latest_file: u32,
}

enum Job {
    Request(DeviceRequest),
    Choices {
        reply: oneshot::Sender<BTreeMap<String, Vec<String>>>,
    },
    ApplySetting {
        label: String,
        value: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Capture {
        folder: PathBuf,
        tag: Option<String>,
        reply: oneshot::Sender<Result<Vec<PathBuf>>>,
    },
    Probe {
        reply: oneshot::Sender<Result<DeviceProbe>>,
    },
    Shutdown,
}

/// Owner of the hardware worker thread.
pub struct HardwareQueue {
    handle: HardwareHandle,
    worker: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    // disconnects when the worker thread exits
    exited: Receiver<()>,
}

/// Cloneable submission side of the queue.
#[derive(Clone)]
pub struct HardwareHandle {
    tx: Sender<Job>,
}

impl HardwareQueue {
    /// Start the worker. It runs until [`HardwareQueue::shutdown`] or
    /// [`HardwareQueue::stop`], or until every handle has been dropped.
    pub fn spawn<U: CameraUtility>(camera: Camera<U>, settings: SettingsMap) -> Result<Self> {
        let (tx, rx) = unbounded();
        let (exit_guard, exited) = bounded::<()>(0);
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = thread::Builder::new()
            .name("hardware-worker".into())
            .spawn({
                let stopping = stopping.clone();
                move || {
                    let _exit_guard = exit_guard;
                    worker_loop(camera, settings, rx, &stopping)
                }
            })?;

        Ok(Self {
            handle: HardwareHandle { tx },
            worker: Some(worker),
            stopping,
            exited,
        })
    }

    pub fn handle(&self) -> HardwareHandle {
        self.handle.clone()
    }

    /// Finish every job queued so far, then stop and join the worker.
    pub fn shutdown(mut self) {
        let _ = self.handle.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("hardware worker panicked");
            }
        }
    }

    /// Abandon queued jobs and wait at most `grace` for the job in flight.
    ///
    /// Returns `false` if the worker was still busy when `grace` ran out; the
    /// thread is then detached and runs no further jobs. Callers of abandoned
    /// jobs see [`CameraError::WorkerGone`].
    pub fn stop(mut self, grace: Duration) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.handle.tx.send(Job::Shutdown);

        match self.exited.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("[queue] hardware worker still busy after {grace:?}, detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        error!("hardware worker panicked");
                    }
                }
                true
            }
        }
    }
}

impl HardwareHandle {
    /// Queue a settings+capture request and return immediately.
    pub fn enqueue(&self, request: DeviceRequest) -> Result<()> {
        self.tx
            .send(Job::Request(request))
            .map_err(|_| CameraError::WorkerGone)
    }

    pub async fn setting_choices(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Choices { reply })?;
        rx.await.map_err(|_| CameraError::WorkerGone)
    }

    pub async fn apply_setting(&self, label: &str, value: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::ApplySetting {
            label: label.to_string(),
            value: value.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CameraError::WorkerGone)?
    }

    pub async fn capture(&self, folder: PathBuf, tag: Option<String>) -> Result<Vec<PathBuf>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Capture { folder, tag, reply })?;
        rx.await.map_err(|_| CameraError::WorkerGone)?
    }

    pub async fn probe(&self) -> Result<DeviceProbe> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Probe { reply })?;
        rx.await.map_err(|_| CameraError::WorkerGone)?
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| CameraError::WorkerGone)
    }
}

fn worker_loop<U: CameraUtility>(
    camera: Camera<U>,
    settings: SettingsMap,
    rx: Receiver<Job>,
    stopping: &AtomicBool,
) {
    info!("[queue] hardware worker started");
    let mut abandoned = 0usize;

    while let Ok(job) = rx.recv() {
        if matches!(job, Job::Shutdown) {
            break;
        }
        if stopping.load(Ordering::SeqCst) {
            abandoned += 1;
            continue;
        }
        match job {
            Job::Shutdown => break,
            Job::Request(request) => match process_request(&camera, &settings, &request) {
                Ok(files) => info!("[queue] Captured: {files:?}"),
                Err(e) => error!("[queue] Error: {e}"),
            },
            Job::Choices { reply } => {
                let choices: BTreeMap<String, Vec<String>> = settings
                    .entries()
                    .iter()
                    .map(|entry| {
                        let values = camera.setting_choices(&entry.label, &entry.path);
                        (entry.label.clone(), values)
                    })
                    .collect();
                if reply.send(choices).is_err() {
                    warn!("[queue] setting choices read after the caller left");
                }
            }
            Job::ApplySetting { label, value, reply } => {
                let outcome = match settings.resolve(&label) {
                    Some(path) => camera.apply_setting(path, &value),
                    None => Err(CameraError::UnknownSetting(label.clone())),
                };
                deliver(&format!("set {label}"), reply, outcome);
            }
            Job::Capture { folder, tag, reply } => {
                deliver("capture", reply, camera.capture(&folder, tag.as_deref()));
            }
            Job::Probe { reply } => {
                let outcome = camera
                    .ensure_connection()
                    .and_then(|()| camera.latest_file_number())
                    .map(|latest_file| DeviceProbe { latest_file });
                deliver("probe", reply, outcome);
            }
        }
    }

    if abandoned > 0 {
        warn!("[queue] abandoned {abandoned} queued jobs");
    }
    info!("[queue] hardware worker stopped");
}

/// Hand the outcome to the caller, or log it if the caller is gone.
fn deliver<T: Debug>(what: &str, reply: oneshot::Sender<Result<T>>, outcome: Result<T>) {
    match reply.send(outcome) {
        Ok(()) => {}
        Err(Ok(value)) => warn!("[queue] {what} finished after the caller left: {value:?}"),
        Err(Err(e)) => error!("[queue] {what} failed after the caller left: {e}"),
    }
}

fn process_request<U: CameraUtility>(
    camera: &Camera<U>,
    settings: &SettingsMap,
    request: &DeviceRequest,
) -> Result<Vec<PathBuf>> {
    for (label, value) in &request.settings {
        match settings.resolve(label) {
            Some(path) => {
                camera.apply_setting(path, value)?;
                debug!("[queue] Set {label} = {value}");
            }
            None => warn!("[queue] skipping unknown setting {label}"),
        }
    }
    camera.capture(&request.folder, None)
}
