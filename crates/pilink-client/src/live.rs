//! Live-view channel: JPEG frames from the capture subprocess to the
//! streaming server, one binary message per frame, while the gate is open.

use crate::RuntimeContext;
use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use pilink_camera::{frame_stream, FrameTokenizer, LiveCapture};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, Message>;
type Inbound = SplitStream<Socket>;

/// Why one streaming attempt stopped.
#[derive(Debug, PartialEq, Eq)]
enum AttemptEnd {
    GateClosed,
    SourceClosed,
}

pub async fn run(ctx: Arc<RuntimeContext>) -> Result<()> {
    let uri = ctx.config.liveview_uri()?;
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(ctx.config.max_message_size);
    ws_config.max_frame_size = Some(ctx.config.max_message_size);

    let (ws, _) = connect_async_with_config(uri.as_str(), Some(ws_config), false)
        .await
        .with_context(|| format!("Failed to connect to {uri}"))?;
    info!("[liveview] Connected to {uri}");

    let (mut sink, mut inbound) = ws.split();
    sink.send(Message::Text(ctx.config.client_id.clone())).await?;

    loop {
        tokio::select! {
            _ = ctx.gate.wait_for(true) => {}
            message = inbound.next() => {
                check_inbound(message)?;
                continue;
            }
        }

        match stream_once(&ctx, &mut sink, &mut inbound).await? {
            AttemptEnd::GateClosed => info!("[liveview] paused"),
            AttemptEnd::SourceClosed => {
                warn!("[liveview] capture stream ended, restarting");
                tokio::time::sleep(ctx.config.capture_restart_delay).await;
            }
        }
    }
}

/// One capture subprocess lifetime. The subprocess is terminated on every
/// return path; if this future is dropped instead, `LiveCapture` kills it.
async fn stream_once(ctx: &RuntimeContext, sink: &mut Sink, inbound: &mut Inbound) -> Result<AttemptEnd> {
    let mut capture = match LiveCapture::spawn(&ctx.config.live_capture_command) {
        Ok(capture) => capture,
        Err(e) => {
            warn!("[liveview] {e}");
            return Ok(AttemptEnd::SourceClosed);
        }
    };
    let Some(stdout) = capture.take_stdout() else {
        capture.terminate().await.ok();
        return Ok(AttemptEnd::SourceClosed);
    };

    let frames = frame_stream(stdout, FrameTokenizer::jpeg(ctx.config.max_frame_len));
    tokio::pin!(frames);

    let mut sent = 0u64;
    let outcome = loop {
        tokio::select! {
            _ = ctx.gate.wait_for(false) => break Ok(AttemptEnd::GateClosed),
            message = inbound.next() => {
                if let Err(e) = check_inbound(message) {
                    break Err(e);
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    if let Err(e) = sink.send(Message::Binary(frame.into_bytes())).await {
                        break Err(e.into());
                    }
                    sent += 1;
                }
                Some(Err(e)) => {
                    warn!("[liveview] capture read failed: {e}");
                    break Ok(AttemptEnd::SourceClosed);
                }
                None => break Ok(AttemptEnd::SourceClosed),
            },
        }
    };

    if let Err(e) = capture.terminate().await {
        warn!("[liveview] failed to stop capture: {e}");
    }
    info!("[liveview] sent {sent} frames");
    outcome
}

/// Server traffic on the live channel is only control frames; anything
/// that ends the session is an error for the supervisor.
fn check_inbound(message: Option<Result<Message, WsError>>) -> Result<()> {
    match message {
        Some(Ok(Message::Close(frame))) => bail!("live-view server closed the channel: {frame:?}"),
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(e).context("Live-view channel failed"),
        None => bail!("live-view channel ended"),
    }
}
