// pilink-camera/src/lib.rs
// ============================================================
// Device side of the pilink field client.
// Wraps the gphoto2 command-line utility, serialises every
// hardware call onto one worker thread, and cuts the live-view
// MJPEG byte stream into discrete JPEG frames.
// ------------------------------------------------------------
// Public API:
//   * Camera::new(utility, cfg)    – settings / choices / capture
//   * HardwareQueue::spawn(cam)    – single-worker executor
//   * FrameTokenizer / frame_stream – START..END frame cutter
//   * LiveCapture::spawn(cmd)      – scoped motion subprocess
// ------------------------------------------------------------
// Build notes
//   * Unix only (SIGTERM delivery to the capture subprocess).
// ============================================================

//! pilink – camera layer
//!
//! Everything that touches the physical camera goes through a
//! [`CameraUtility`], and in production every utility call is issued
//! from the single [`HardwareQueue`] worker so that at most one command
//! is in flight against the device. The live-view path is separate: a
//! [`LiveCapture`] subprocess writes a raw motion stream that
//! [`frame_stream`] tokenizes into [`Frame`]s.

use thiserror::Error;

mod capture;
mod config;
mod control;
mod queue;
mod stream;
mod utility;

pub use capture::LiveCapture;
pub use config::{duration_ms, CaptureConfig, SettingPath, SettingsMap};
pub use control::{
    is_busy, parse_choices, parse_latest_file_number, parse_saved_files, Camera,
};
pub use queue::{DeviceProbe, DeviceRequest, HardwareHandle, HardwareQueue};
pub use stream::{frame_stream, Frame, FrameTokenizer, JPEG_END, JPEG_START};
pub use utility::{CameraUtility, Gphoto2, UtilityOutput};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout {
        program: String,
        timeout: std::time::Duration,
    },
    #[error("Empty capture command")]
    EmptyCommand,
    #[error("No camera detected after {0} attempts")]
    NotConnected(u32),
    #[error("Unknown camera setting: {0}")]
    UnknownSetting(String),
    #[error("Failed to set {path}: {stderr}")]
    SetConfig { path: String, stderr: String },
    #[error("Failed to list files: {0}")]
    ListFiles(String),
    #[error("Capture failed: {0}")]
    CaptureFailed(String),
    #[error("Failed to capture after {0} attempts")]
    RetriesExhausted(u32),
    #[error("Hardware worker is not running")]
    WorkerGone,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;
