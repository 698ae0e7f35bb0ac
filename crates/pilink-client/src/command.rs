//! Command channel: one websocket session to the command server.
//!
//! Connect, announce the client id, then answer requests strictly in
//! arrival order until the connection ends. Reconnecting is the
//! supervisor's job.

use crate::{Dispatcher, RuntimeContext};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub async fn run(ctx: Arc<RuntimeContext>) -> Result<()> {
    let uri = ctx.config.server_uri.as_str();
    let id = ctx.config.client_id.as_str();

    let (mut ws, _) = connect_async(uri)
        .await
        .with_context(|| format!("Failed to connect to {uri}"))?;
    info!("[{id}] Connected to {uri}");

    ws.send(Message::Text(id.to_string())).await?;

    let dispatcher = Dispatcher::new(ctx.clone());
    let mut keepalive = interval(ctx.config.ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    loop {
        tokio::select! {
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!("[rpc] <- {text}");
                    let response = dispatcher.handle_text(&text).await.to_json();
                    debug!("[rpc] -> {response}");
                    ws.send(Message::Text(response)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("[{id}] Server closed the command channel: {frame:?}");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Command channel failed"),
                None => {
                    info!("[{id}] Command channel ended");
                    return Ok(());
                }
            },
            _ = keepalive.tick() => {
                ws.send(Message::Ping(Vec::new())).await?;
            }
        }
    }
}
