use thiserror::Error;

/// Errors surfaced by the compositing pipeline and its session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source stream has no video track")]
    NoVideoTrack,

    #[error("session already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported surface size {width}x{height}")]
    UnsupportedSurface { width: u32, height: u32 },

    #[error("segmentation oracle failed to initialize: {0}")]
    OracleSetup(String),

    #[error("background image could not be loaded")]
    Background(#[from] image::ImageError),

    #[error("background image could not be fetched: {0}")]
    BackgroundFetch(String),

    #[error("mask holds {actual} values, expected {expected}")]
    MaskSize { expected: usize, actual: usize },

    #[error("segmentation failed: {0}")]
    Inference(String),

    #[error("frame source failed: {0}")]
    Source(String),

    #[error("frame sink failed: {0}")]
    Sink(String),

    #[error("pipeline task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Whether the error was raised while starting a session, before any
    /// frame was pulled.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            PipelineError::NoVideoTrack
                | PipelineError::AlreadyStarted
                | PipelineError::InvalidConfig(_)
                | PipelineError::UnsupportedSurface { .. }
                | PipelineError::OracleSetup(_)
                | PipelineError::Background(_)
                | PipelineError::BackgroundFetch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
