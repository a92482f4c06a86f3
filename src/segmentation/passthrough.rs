use super::types::{Mask, OracleOptions, SegmentationOracle};
use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;

/// Oracle that reports every pixel as foreground, so frames pass through the
/// compositor unchanged. Used when no model is configured.
#[derive(Debug, Default)]
pub struct PassthroughOracle;

#[async_trait]
impl SegmentationOracle for PassthroughOracle {
    async fn configure(&mut self, _options: &OracleOptions) -> Result<()> {
        tracing::info!("Running in passthrough mode (no segmentation)");
        Ok(())
    }

    async fn submit(&mut self, frame: &RgbImage) -> Result<Mask> {
        let (width, height) = frame.dimensions();
        Ok(Mask::filled(width, height, 1.0))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
