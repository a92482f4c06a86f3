#[cfg(feature = "capture")]
mod v4l_capture;

#[cfg(feature = "capture")]
pub use v4l_capture::WebcamCapture;

use crate::frame::Frame;
use anyhow::Result;
use async_trait::async_trait;

/// Trait for frame sources feeding the pipeline
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame; `None` once the source has been stopped
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Get the display resolution of delivered frames
    fn resolution(&self) -> (u32, u32);

    /// Stop producing frames
    fn stop(&mut self);
}
