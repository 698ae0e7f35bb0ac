//! Restart policy for the two channels.
//!
//! Both units run as sibling tasks. When either one returns or panics the
//! other is cancelled too, and after `restart_delay` both start again from
//! scratch. A shutdown future ends the loop at any point.

use anyhow::Result;
use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;

pub struct Supervisor {
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(restart_delay: Duration) -> Self {
        Self { restart_delay }
    }

    /// Run `command` and `live` until `shutdown` resolves. Returns how many
    /// times the pair was restarted.
    pub async fn run<C, CF, L, LF, S>(&self, mut command: C, mut live: L, shutdown: S) -> u32
    where
        C: FnMut() -> CF,
        CF: Future<Output = Result<()>> + Send + 'static,
        L: FnMut() -> LF,
        LF: Future<Output = Result<()>> + Send + 'static,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut restarts = 0u32;

        loop {
            let mut units: JoinSet<(&'static str, Result<()>)> = JoinSet::new();
            let cmd = command();
            units.spawn(async move { ("command", cmd.await) });
            let lv = live();
            units.spawn(async move { ("liveview", lv.await) });

            tokio::select! {
                _ = &mut shutdown => {
                    info!("[supervisor] shutting down");
                    units.shutdown().await;
                    return restarts;
                }
                Some(joined) = units.join_next() => match joined {
                    Ok((name, Ok(()))) => warn!("[supervisor] {name} channel closed"),
                    Ok((name, Err(e))) => error!("[supervisor] {name} channel failed: {e:#}"),
                    Err(e) if e.is_panic() => error!("[supervisor] a channel panicked: {e}"),
                    Err(e) => error!("[supervisor] a channel was cancelled: {e}"),
                },
            }

            units.shutdown().await;
            restarts += 1;
            info!(
                "[supervisor] restarting both channels in {:?} (restart #{restarts})",
                self.restart_delay
            );

            tokio::select! {
                _ = &mut shutdown => {
                    info!("[supervisor] shutting down");
                    return restarts;
                }
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
        }
    }
}
