//! Real-time background blur and replacement for live video.
//!
//! A [`Session`] pulls frames from a [`track::VideoTrack`] (or any
//! [`FrameSource`]), asks a [`SegmentationOracle`] for a person mask, layers
//! the frame over a blurred or replaced background and republishes the result
//! on a new output track with the original timestamps.

pub mod capture;
pub mod compositing;
pub mod error;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod session;
pub mod track;

pub use capture::FrameSource;
pub use compositing::{BackgroundFit, BackgroundSource, BackgroundSpec, Compositor};
pub use error::{PipelineError, Result};
pub use frame::Frame;
pub use output::FrameSink;
pub use pipeline::{run_pipeline, PipelineStage, PipelineStats};
pub use segmentation::{Mask, ModelVariant, OracleOptions, PassthroughOracle, SegmentationOracle};
pub use session::{start_blur, start_replacement, Session, SessionConfig, SessionState};
pub use track::{MediaStream, TrackHandle, TrackState, TrackWriter, VideoTrack};
