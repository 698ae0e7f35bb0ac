use crate::{ClientConfig, LiveViewGate, Uploader};
use anyhow::Result;
use pilink_camera::HardwareHandle;

/// Shared state handed to both channels and the operation handlers.
pub struct RuntimeContext {
    pub config: ClientConfig,
    pub gate: LiveViewGate,
    pub hardware: HardwareHandle,
    pub uploader: Uploader,
}

impl RuntimeContext {
    pub fn new(config: ClientConfig, hardware: HardwareHandle) -> Result<Self> {
        let gate = LiveViewGate::new(config.liveview_on_start);
        let uploader = Uploader::new(config.upload_url.clone(), config.upload_timeout)?;
        Ok(Self {
            config,
            gate,
            hardware,
            uploader,
        })
    }
}
