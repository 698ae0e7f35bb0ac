//! Stand-ins for the remote servers and the camera utility.

#![allow(dead_code)]

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use pilink_camera::{Camera, CaptureConfig, Gphoto2, HardwareQueue};
use pilink_client::{ClientConfig, RuntimeContext};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(5);

/// Shell script answering like gphoto2 with one camera attached. A capture
/// announces a raw and a processed file; with `write_files` it also creates them.
pub fn fake_gphoto(dir: &Path, write_files: bool) -> PathBuf {
    let create = if write_files {
        r#"printf raw > "$base.cr2"; printf jpg > "$base.jpg""#
    } else {
        ":"
    };
    let script = format!(
        r##"#!/bin/sh
case "$1" in
  --auto-detect) echo "Model                  Port"; echo "Canon EOS 600D         usb:001,004" ;;
  --get-config) echo "Current: 100"; echo "Choice: 0 100"; echo "Choice: 1 200" ;;
  --set-config) ;;
  --list-files) echo "#1 IMG_0001.JPG"; echo "#2 IMG_0002.CR2" ;;
  --reset) ;;
  --capture-image-and-download)
    base="${{3%.%C}}"
    {create}
    echo "Saving file as $base.cr2"
    echo "Saving file as $base.jpg" ;;
  *) echo "unknown option $1" >&2; exit 1 ;;
esac
"##
    );
    let path = dir.join("gphoto2");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn config_for(dir: &Path, utility: &Path) -> ClientConfig {
    ClientConfig {
        camera_utility: utility.to_string_lossy().into_owned(),
        photos_dir: dir.join("photos"),
        capture: CaptureConfig::immediate(),
        restart_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

pub fn context(config: ClientConfig) -> (Arc<RuntimeContext>, HardwareQueue) {
    let camera = Camera::new(Gphoto2::new(&config.camera_utility), config.capture.clone());
    let queue = HardwareQueue::spawn(camera, config.settings.clone()).unwrap();
    let ctx = RuntimeContext::new(config, queue.handle()).unwrap();
    (Arc::new(ctx), queue)
}

pub async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("ws://{}", listener.local_addr().unwrap());
    (listener, uri)
}

/// Accept one client and return its socket plus the identity it announced.
pub async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (tcp, _) = tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let identity = match next_message(&mut ws).await {
        Some(Message::Text(id)) => id,
        other => panic!("expected identity, got {other:?}"),
    };
    (ws, identity)
}

/// Next data message, skipping keepalives. `None` once the client is gone.
pub async fn next_message(ws: &mut WebSocketStream<TcpStream>) -> Option<Message> {
    loop {
        match tokio::time::timeout(WAIT, ws.next()).await.expect("client went quiet") {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(message)) => return Some(message),
        }
    }
}

/// Send a request and return the decoded response.
pub async fn call(ws: &mut WebSocketStream<TcpStream>, request: &str) -> serde_json::Value {
    ws.send(Message::Text(request.to_string())).await.unwrap();
    match next_message(ws).await {
        Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text response, got {other:?}"),
    }
}

/// One multipart field as the upload server saw it.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// HTTP upload endpoint forwarding every received form to the returned channel.
pub async fn upload_server() -> (String, mpsc::UnboundedReceiver<Vec<Field>>) {
    async fn upload(
        State(tx): State<mpsc::UnboundedSender<Vec<Field>>>,
        mut multipart: Multipart,
    ) -> &'static str {
        let mut fields = Vec::new();
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            fields.push(Field { name, file_name, bytes });
        }
        let _ = tx.send(fields);
        "stored"
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route("/upload", post(upload)).with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/upload", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });
    (url, rx)
}
