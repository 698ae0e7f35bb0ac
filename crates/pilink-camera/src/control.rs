//! Camera operations on top of a [`CameraUtility`].
//!
//! Output parsing follows gphoto2's text conventions: enumerations are
//! `Choice: <n> <value>` lines, downloaded files are announced with
//! `Saving file as <path>`, and a claimed USB device is reported on
//! stderr.

use crate::{CameraError, CameraUtility, CaptureConfig, Result, UtilityOutput};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

const SAVED_MARKER: &str = "Saving file as";
const BUSY_MARKERS: [&str; 2] = ["Could not claim the USB device", "resource busy"];

/// Blocking handle on one physical camera.
pub struct Camera<U: CameraUtility> {
    utility: U,
    config: CaptureConfig,
}

impl<U: CameraUtility> Camera<U> {
    pub fn new(utility: U, config: CaptureConfig) -> Self {
        Self { utility, config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn run(&self, args: &[&str], timeout: Option<Duration>) -> Result<UtilityOutput> {
        self.utility.run(args, timeout)
    }

    /// Poll `--auto-detect` until a USB camera shows up.
    pub fn ensure_connection(&self) -> Result<()> {
        let attempts = self.config.detect_attempts.max(1);
        for attempt in 1..=attempts {
            let out = self.run(&["--auto-detect"], None)?;
            if out.stdout.to_lowercase().contains("usb:") {
                debug!("Camera connected.");
                return Ok(());
            }
            warn!("No camera detected. Attempt {attempt} of {attempts}.");
            if attempt < attempts {
                sleep(self.config.detect_delay);
            }
        }
        Err(CameraError::NotConnected(attempts))
    }

    /// Enumerate the values a setting accepts. Failures yield an empty list.
    pub fn setting_choices(&self, label: &str, path: &str) -> Vec<String> {
        if let Err(e) = self.ensure_connection() {
            warn!("Camera not connected when querying {label}: {e}");
            return Vec::new();
        }
        match self.run(&["--get-config", path], Some(self.config.query_timeout)) {
            Ok(out) => parse_choices(&out.stdout),
            Err(e) => {
                warn!("Error reading {label}: {e}");
                Vec::new()
            }
        }
    }

    pub fn apply_setting(&self, path: &str, value: &str) -> Result<()> {
        let assignment = format!("{path}={value}");
        let out = self.run(&["--set-config", assignment.as_str()], None)?;
        if !out.success {
            return Err(CameraError::SetConfig {
                path: path.to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    /// Highest `#N` entry in `--list-files`.
    pub fn latest_file_number(&self) -> Result<u32> {
        let out = self.run(&["--list-files"], None)?;
        if !out.success {
            return Err(CameraError::ListFiles(out.stderr.trim().to_string()));
        }
        Ok(parse_latest_file_number(&out.stdout))
    }

    pub fn reset(&self) -> Result<()> {
        let out = self.run(&["--reset"], None)?;
        if !out.success {
            warn!("[reset] {}", out.stderr.trim());
        }
        Ok(())
    }

    /// Capture and download into `folder`, retrying while the USB device is
    /// claimed. Returns the saved files in the order the utility reported them.
    pub fn capture(&self, folder: &Path, tag: Option<&str>) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(folder)?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = match tag {
            Some(tag) => format!("photo_{tag}_{stamp}.%C"),
            None => format!("photo_{stamp}.%C"),
        };
        let target = folder.join(name);
        let target = target.to_string_lossy();

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let out = self.run(
                &["--capture-image-and-download", "--filename", target.as_ref()],
                None,
            )?;
            debug!("[capture] stdout: {} stderr: {}", out.stdout.trim(), out.stderr.trim());

            if out.success {
                let files: Vec<PathBuf> = parse_saved_files(&out.stdout)
                    .into_iter()
                    .map(|name| folder.join(name))
                    .collect();
                info!("[capture] saved {files:?}");
                if let Err(e) = self.reset() {
                    warn!("[reset] {e}");
                }
                sleep(self.config.settle_delay);
                return Ok(files);
            }

            if is_busy(&out.stderr) {
                warn!("[capture] USB busy, attempt {attempt} of {attempts}.");
                if attempt < attempts {
                    sleep(self.config.busy_backoff);
                }
                continue;
            }

            return Err(CameraError::CaptureFailed(out.stderr.trim().to_string()));
        }

        Err(CameraError::RetriesExhausted(attempts))
    }
}

/// Values from `Choice: <index> <value>` lines.
pub fn parse_choices(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("Choice:"))
        .filter_map(|line| line.splitn(3, ' ').nth(2))
        .map(str::to_string)
        .collect()
}

/// Base names of files announced with `Saving file as ...`.
pub fn parse_saved_files(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split(SAVED_MARKER).nth(1))
        .map(str::trim)
        .filter_map(|path| Path::new(path).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

pub fn parse_latest_file_number(stdout: &str) -> u32 {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token[1..].parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

/// Transient "device is claimed by someone else" condition.
pub fn is_busy(stderr: &str) -> bool {
    BUSY_MARKERS.iter().any(|marker| stderr.contains(marker))
}
