#[cfg(feature = "loopback")]
mod loopback;

#[cfg(feature = "loopback")]
pub use loopback::V4L2Output;

use crate::frame::Frame;
use anyhow::Result;
use async_trait::async_trait;

/// Trait for output destinations
#[async_trait]
pub trait FrameSink: Send {
    /// Write a frame to the output, taking ownership of it
    async fn write_frame(&mut self, frame: Frame) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);

    /// Whether the output no longer accepts frames
    fn is_closed(&self) -> bool {
        false
    }

    /// Signal that no more frames will be written
    fn close(&mut self) {}
}
