//! Session lifecycle: wiring source, oracle, compositor and output track
//! together, and tearing them down again.

use crate::capture::FrameSource;
use crate::compositing::{BackgroundFit, BackgroundSource, BackgroundSpec, Compositor};
use crate::error::{PipelineError, Result};
use crate::pipeline::{run_pipeline, PipelineStage};
use crate::segmentation::{OracleOptions, SegmentationOracle};
use crate::track::{self, MediaStream, TrackHandle, VideoTrack};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub oracle: OracleOptions,
    /// Frames that may wait on the output track before the pipeline blocks
    pub output_capacity: usize,
    /// Publish the mask itself instead of the composite
    pub show_matte: bool,
    /// Log timings every this many frames, 0 disables
    pub stats_interval: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            oracle: OracleOptions::default(),
            output_capacity: 1,
            show_matte: false,
            stats_interval: 30,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        if self.output_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "output capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

type PipelineOutcome = (Box<dyn SegmentationOracle>, Result<()>);

struct RunningPipeline {
    shutdown: watch::Sender<bool>,
    output: TrackHandle,
    task: JoinHandle<PipelineOutcome>,
}

/// One compositing session.
///
/// Owns its oracle exclusively. A session runs at most once: after `stop`
/// the oracle has been closed and a new session is needed.
pub struct Session {
    state: SessionState,
    oracle: Option<Box<dyn SegmentationOracle>>,
    config: SessionConfig,
    running: Option<RunningPipeline>,
}

impl Session {
    pub fn new(oracle: Box<dyn SegmentationOracle>, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Idle,
            oracle: Some(oracle),
            config,
            running: None,
        }
    }

    /// Current state.
    ///
    /// A run that ended on its own (source finished, output dropped or a
    /// fatal error) reports `Idle`; `stop` still collects its outcome and
    /// closes the oracle.
    pub fn state(&self) -> SessionState {
        match &self.running {
            Some(running) if self.state == SessionState::Running && running.task.is_finished() => {
                SessionState::Idle
            }
            _ => self.state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Start compositing the first video track of `stream`.
    ///
    /// Returns the output track. On a setup error nothing is left running
    /// and the session is back to `Idle`.
    pub async fn start(
        &mut self,
        stream: MediaStream,
        background: BackgroundSpec,
    ) -> Result<VideoTrack> {
        if self.state != SessionState::Idle || self.oracle.is_none() {
            return Err(PipelineError::AlreadyStarted);
        }

        self.state = SessionState::Starting;
        match self.launch(stream, &background).await {
            Ok(output) => {
                self.state = SessionState::Running;
                Ok(output)
            }
            Err(err) => {
                tracing::warn!("Session failed to start: {}", err);
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    async fn launch(
        &mut self,
        mut stream: MediaStream,
        background: &BackgroundSpec,
    ) -> Result<VideoTrack> {
        self.config.validate()?;

        let mut source = stream
            .take_first_video_track()
            .ok_or(PipelineError::NoVideoTrack)?;
        let (width, height) = source.resolution();
        let compositor = Compositor::new(width, height, background)?;

        let mut oracle = self.oracle.take().ok_or(PipelineError::AlreadyStarted)?;
        if let Err(err) = oracle.configure(&self.config.oracle).await {
            self.oracle = Some(oracle);
            return Err(PipelineError::OracleSetup(format!("{err:#}")));
        }

        let (mut writer, output) = track::channel(width, height, self.config.output_capacity);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let mut stage = PipelineStage::new(oracle, compositor)
            .mirrored(self.config.oracle.mirror_input)
            .show_matte(self.config.show_matte)
            .stats_interval(self.config.stats_interval);

        let task = tokio::spawn(async move {
            let outcome =
                run_pipeline(&mut stage, source.as_mut(), &mut writer, &mut shutdown_rx).await;
            source.stop();
            writer.end();

            let outcome = match outcome {
                Ok(frames) => {
                    tracing::info!("Pipeline finished after {} frames", frames);
                    Ok(())
                }
                Err(err) => {
                    tracing::error!("Pipeline aborted: {}", err);
                    Err(err)
                }
            };
            (stage.into_oracle(), outcome)
        });

        tracing::info!("Session started at {}x{}", width, height);
        self.running = Some(RunningPipeline {
            shutdown,
            output: output.handle(),
            task,
        });
        Ok(output)
    }

    /// Stop the session.
    ///
    /// The output track is ended before the first suspension point, so no
    /// frame is delivered once this has been called. A frame already inside
    /// the oracle is allowed to finish and is then discarded. Oracle close
    /// failures are logged, not returned; a fatal error from the pipeline run
    /// is. Calling `stop` again is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            tracing::debug!("Session already stopped");
            return Ok(());
        };

        tracing::info!("Stopping session");
        self.state = SessionState::Stopping;
        running.shutdown.send_replace(true);
        running.output.stop();

        let outcome = match running.task.await {
            Ok((mut oracle, outcome)) => {
                if let Err(err) = oracle.close().await {
                    tracing::warn!("Failed to close segmentation oracle: {:#}", err);
                }
                outcome
            }
            Err(err) => Err(PipelineError::Aborted(err.to_string())),
        };

        self.state = SessionState::Idle;
        tracing::info!("Session stopped");
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            tracing::warn!("Session dropped while running, oracle will not be closed");
            running.shutdown.send_replace(true);
            running.output.stop();
        }
    }
}

/// Start a session that blurs the background with the default radius.
pub async fn start_blur(
    stream: MediaStream,
    oracle: Box<dyn SegmentationOracle>,
    config: SessionConfig,
) -> Result<(Session, VideoTrack)> {
    let mut session = Session::new(oracle, config);
    let output = session.start(stream, BackgroundSpec::default()).await?;
    Ok((session, output))
}

/// Start a session that replaces the background with a still image.
///
/// The image is fetched and decoded before anything else is set up.
pub async fn start_replacement(
    stream: MediaStream,
    oracle: Box<dyn SegmentationOracle>,
    background: &BackgroundSource,
    fit: BackgroundFit,
    config: SessionConfig,
) -> Result<(Session, VideoTrack)> {
    let image = background.decode().await?;
    let mut session = Session::new(oracle, config);
    let output = session
        .start(stream, BackgroundSpec::replace_with_fit(image, fit))
        .await?;
    Ok((session, output))
}
