//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backdrop_fx::{Frame, Mask, OracleOptions, SegmentationOracle};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Counters an oracle updates, readable after the oracle has been moved away.
#[derive(Debug, Default)]
pub struct OracleProbe {
    configures: AtomicUsize,
    submits: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl OracleProbe {
    pub fn configures(&self) -> usize {
        self.configures.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

type MaskFn = Box<dyn Fn(u32, u32) -> Mask + Send>;

/// Oracle with a programmable mask and failure points.
pub struct ScriptedOracle {
    mask: MaskFn,
    probe: Arc<OracleProbe>,
    gate: Option<Arc<Semaphore>>,
    fail_configure: bool,
    fail_submit_at: Option<usize>,
    fail_close: bool,
}

impl ScriptedOracle {
    pub fn new<F>(mask: F) -> Self
    where
        F: Fn(u32, u32) -> Mask + Send + 'static,
    {
        Self {
            mask: Box::new(mask),
            probe: Arc::new(OracleProbe::default()),
            gate: None,
            fail_configure: false,
            fail_submit_at: None,
            fail_close: false,
        }
    }

    pub fn foreground() -> Self {
        Self::new(|width, height| Mask::filled(width, height, 1.0))
    }

    pub fn background() -> Self {
        Self::new(|width, height| Mask::filled(width, height, 0.0))
    }

    /// Opaque in the centre half of each axis.
    pub fn centre() -> Self {
        Self::new(|width, height| Mask::from_fn(width, height, |x, y| {
            let inside_x = x >= width / 4 && x < width * 3 / 4;
            let inside_y = y >= height / 4 && y < height * 3 / 4;
            if inside_x && inside_y {
                1.0
            } else {
                0.0
            }
        }))
    }

    /// Each submit waits for a permit on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Fail the submit with this zero-based index.
    pub fn failing_submit_at(mut self, index: usize) -> Self {
        self.fail_submit_at = Some(index);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn probe(&self) -> Arc<OracleProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl SegmentationOracle for ScriptedOracle {
    async fn configure(&mut self, _options: &OracleOptions) -> Result<()> {
        self.probe.configures.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure {
            return Err(anyhow!("model assets unreachable"));
        }
        Ok(())
    }

    async fn submit(&mut self, frame: &RgbImage) -> Result<Mask> {
        let index = self.probe.submits.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        tokio::task::yield_now().await;
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_submit_at == Some(index) {
            return Err(anyhow!("inference failed on frame {index}"));
        }
        let (width, height) = frame.dimensions();
        Ok((self.mask)(width, height))
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(anyhow!("close rejected"));
        }
        Ok(())
    }
}

/// Counts frame releases.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter(Arc<AtomicUsize>);

impl ReleaseCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn frame(&self, image: RgbImage, timestamp: u64) -> Frame {
        let counter = Arc::clone(&self.0);
        Frame::new(image, timestamp).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Checkerboard with 4px cells, so a blur visibly changes it.
pub fn checkerboard(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([240, 240, 240])
        } else {
            Rgb([20, 40, 60])
        }
    })
}
