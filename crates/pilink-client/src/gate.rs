use std::sync::Arc;
use tokio::sync::watch;

/// On/off switch for the live-view stream.
///
/// Toggled by the `startLiveView`/`stopLiveView` operations and observed by
/// the live-view channel. Waiting is event driven, so a closed gate costs
/// nothing and an opened one is noticed immediately.
#[derive(Clone, Debug)]
pub struct LiveViewGate {
    state: Arc<watch::Sender<bool>>,
}

impl LiveViewGate {
    pub fn new(open: bool) -> Self {
        let (state, _) = watch::channel(open);
        Self { state: Arc::new(state) }
    }

    pub fn set(&self, open: bool) {
        self.state.send_replace(open);
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the gate is in the `open` state (immediately if it already is).
    pub async fn wait_for(&self, open: bool) {
        let mut rx = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|state| *state == open).await;
    }
}
