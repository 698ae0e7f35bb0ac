//! Client configuration: defaults, optional JSON file, CLI/env overrides.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use pilink_camera::{duration_ms, CaptureConfig, SettingsMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Command-line flags. Every flag can also come from a `PILINK_*` variable.
#[derive(Parser, Debug, Default)]
#[command(name = "pilink", version, about = "Remote-controlled camera client")]
pub struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, env = "PILINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity announced to both servers
    #[arg(long, env = "PILINK_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Command server, e.g. ws://10.0.0.2:8001
    #[arg(long, env = "PILINK_SERVER")]
    pub server: Option<String>,

    /// Live-view server (default: command host, port 4001)
    #[arg(long, env = "PILINK_LIVEVIEW")]
    pub liveview: Option<String>,

    /// Multipart upload endpoint for captured media
    #[arg(long, env = "PILINK_UPLOAD_URL")]
    pub upload_url: Option<String>,

    #[arg(long, env = "PILINK_PHOTOS_DIR")]
    pub photos_dir: Option<PathBuf>,

    /// Start with the live view gate closed
    #[arg(long)]
    pub no_liveview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_id: String,
    pub server_uri: String,
    /// Explicit live-view endpoint; derived from `server_uri` when absent
    pub liveview_uri: Option<String>,
    pub liveview_port: u16,
    pub upload_url: String,
    #[serde(with = "duration_ms")]
    pub upload_timeout: Duration,
    pub photos_dir: PathBuf,
    pub photo_user: String,
    /// Pause between a channel failure and the restart of both channels
    #[serde(with = "duration_ms")]
    pub restart_delay: Duration,
    #[serde(with = "duration_ms")]
    pub ping_interval: Duration,
    pub max_message_size: usize,
    pub liveview_on_start: bool,
    pub live_capture_command: Vec<String>,
    #[serde(with = "duration_ms")]
    pub capture_restart_delay: Duration,
    pub max_frame_len: usize,
    pub camera_utility: String,
    pub thermal_zone: PathBuf,
    pub capture: CaptureConfig,
    pub settings: SettingsMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "pi-001".into(),
            server_uri: "ws://127.0.0.1:8001".into(),
            liveview_uri: None,
            liveview_port: 4001,
            upload_url: "http://127.0.0.1:25566/upload".into(),
            upload_timeout: Duration::from_secs(60),
            photos_dir: PathBuf::from("photos"),
            photo_user: "default".into(),
            restart_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            max_message_size: 2 * 1024 * 1024,
            liveview_on_start: true,
            live_capture_command: vec![
                "gphoto2".into(),
                "--capture-movie".into(),
                "--stdout".into(),
            ],
            capture_restart_delay: Duration::from_millis(500),
            max_frame_len: 2 * 1024 * 1024,
            camera_utility: "gphoto2".into(),
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            capture: CaptureConfig::default(),
            settings: SettingsMap::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config file: {path:?}"))
    }

    /// File (if any) first, then flag/env overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(id) = &cli.client_id {
            config.client_id = id.clone();
        }
        if let Some(server) = &cli.server {
            config.server_uri = server.clone();
        }
        if let Some(liveview) = &cli.liveview {
            config.liveview_uri = Some(liveview.clone());
        }
        if let Some(url) = &cli.upload_url {
            config.upload_url = url.clone();
        }
        if let Some(dir) = &cli.photos_dir {
            config.photos_dir = dir.clone();
        }
        if cli.no_liveview {
            config.liveview_on_start = false;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            bail!("client_id must not be empty");
        }
        if self.live_capture_command.is_empty() {
            bail!("live_capture_command must name a program");
        }
        if self.ping_interval.is_zero() {
            bail!("ping_interval must be positive");
        }
        self.liveview_uri().map(|_| ())
    }

    /// Live-view endpoint: explicit value, or the command host on `liveview_port`.
    pub fn liveview_uri(&self) -> Result<String> {
        if let Some(uri) = &self.liveview_uri {
            return Ok(uri.clone());
        }
        let parsed: Uri = self
            .server_uri
            .parse()
            .with_context(|| format!("Invalid server URI: {}", self.server_uri))?;
        let scheme = parsed.scheme_str().unwrap_or("ws");
        if scheme != "ws" && scheme != "wss" {
            bail!("Server URI must be ws:// or wss://, got {}", self.server_uri);
        }
        let host = parsed
            .host()
            .ok_or_else(|| anyhow!("Server URI has no host: {}", self.server_uri))?;
        Ok(format!("{scheme}://{host}:{}", self.liveview_port))
    }

    /// Folder captures land in.
    pub fn photo_folder(&self) -> PathBuf {
        self.photos_dir.join(&self.photo_user)
    }
}
