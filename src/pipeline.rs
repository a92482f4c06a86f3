use crate::capture::FrameSource;
use crate::compositing::Compositor;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::output::FrameSink;
use crate::segmentation::SegmentationOracle;
use image::imageops;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Running per-stage timings, logged every `interval` frames.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    frames: u64,
    total_segment_time: Duration,
    total_composite_time: Duration,
    interval: u64,
}

impl PipelineStats {
    fn new(interval: u64) -> Self {
        Self {
            frames: 0,
            total_segment_time: Duration::ZERO,
            total_composite_time: Duration::ZERO,
            interval,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn avg_segment_ms(&self) -> f64 {
        average_ms(self.total_segment_time, self.frames)
    }

    pub fn avg_composite_ms(&self) -> f64 {
        average_ms(self.total_composite_time, self.frames)
    }

    fn record(&mut self, segment_time: Duration, composite_time: Duration) {
        self.frames += 1;
        self.total_segment_time += segment_time;
        self.total_composite_time += composite_time;

        if self.interval > 0 && self.frames % self.interval == 0 {
            let avg_segment_ms = self.avg_segment_ms();
            let avg_composite_ms = self.avg_composite_ms();
            let total_ms = avg_segment_ms + avg_composite_ms;
            tracing::info!(
                "Frame {}: segment={:.1}ms, composite={:.1}ms, total={:.1}ms, fps={:.1}",
                self.frames,
                avg_segment_ms,
                avg_composite_ms,
                total_ms,
                if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 }
            );
        }
    }
}

fn average_ms(total: Duration, frames: u64) -> f64 {
    if frames == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / frames as f64
    }
}

/// Turns one input frame into one output frame.
///
/// Owns the oracle and the compositor for its whole life; `process` takes
/// `&mut self`, so at most one frame is ever inside the stage.
pub struct PipelineStage {
    oracle: Box<dyn SegmentationOracle>,
    compositor: Compositor,
    mirror: bool,
    show_matte: bool,
    last_timestamp: Option<u64>,
    warned_resize: bool,
    stats: PipelineStats,
}

impl PipelineStage {
    pub fn new(oracle: Box<dyn SegmentationOracle>, compositor: Compositor) -> Self {
        Self {
            oracle,
            compositor,
            mirror: false,
            show_matte: false,
            last_timestamp: None,
            warned_resize: false,
            stats: PipelineStats::new(30),
        }
    }

    /// Flip frames horizontally before segmentation (selfie view).
    pub fn mirrored(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Emit the mask as a grayscale image instead of the composite.
    pub fn show_matte(mut self, show_matte: bool) -> Self {
        self.show_matte = show_matte;
        self
    }

    pub fn stats_interval(mut self, frames: u64) -> Self {
        self.stats.interval = frames;
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Hand the oracle back, e.g. to close it.
    pub fn into_oracle(self) -> Box<dyn SegmentationOracle> {
        self.oracle
    }

    /// Segment and composite one frame.
    ///
    /// The input frame is released before this returns, on success and on
    /// failure alike. The output carries the input's timestamp.
    pub async fn process(&mut self, mut frame: Frame) -> Result<Frame> {
        if frame.normalize() {
            tracing::debug!(
                "Rescaled frame {} to display size {:?}",
                frame.timestamp(),
                frame.display_size()
            );
        }
        if frame.dimensions() != self.compositor.dimensions() && !self.warned_resize {
            tracing::warn!(
                "Source delivers {:?} but the surface is {:?}; scaling every frame",
                frame.dimensions(),
                self.compositor.dimensions()
            );
            self.warned_resize = true;
        }
        if self.mirror {
            imageops::flip_horizontal_in_place(frame.image_mut());
        }

        let timestamp = frame.timestamp();
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                tracing::warn!("Timestamp went backwards: {} after {}", timestamp, last);
            }
        }
        self.last_timestamp = Some(timestamp);

        let segment_start = Instant::now();
        let mask = match self.oracle.submit(frame.image()).await {
            Ok(mask) => mask,
            Err(err) => {
                frame.close();
                return Err(PipelineError::Inference(format!("{err:#}")));
            }
        };
        let segment_time = segment_start.elapsed();

        let composite_start = Instant::now();
        let output = if self.show_matte {
            let (width, height) = self.compositor.dimensions();
            mask.resized(width, height).to_rgb_image()
        } else {
            self.compositor.compose(frame.image(), &mask)
        };
        frame.close();
        let composite_time = composite_start.elapsed();

        self.stats.record(segment_time, composite_time);
        Ok(Frame::new(output, timestamp))
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Pull, process and forward frames until shutdown, end of source, a closed
/// sink or an error.
///
/// Only one frame is pulled at a time. A frame that finishes processing after
/// shutdown was raised is dropped instead of forwarded. Returns the number of
/// frames forwarded.
pub async fn run_pipeline(
    stage: &mut PipelineStage,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<u64> {
    let mut forwarded = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_shutdown(shutdown) => break,
            next = source.next_frame() => {
                next.map_err(|err| PipelineError::Source(format!("{err:#}")))?
            }
        };
        let Some(frame) = next else {
            tracing::info!("Source track ended");
            break;
        };

        let output = stage.process(frame).await?;

        let stopped = *shutdown.borrow();
        if stopped || sink.is_closed() {
            tracing::debug!("Dropping frame {} finished after stop", output.timestamp());
            break;
        }

        sink.write_frame(output)
            .await
            .map_err(|err| PipelineError::Sink(format!("{err:#}")))?;
        forwarded += 1;
    }

    Ok(forwarded)
}
