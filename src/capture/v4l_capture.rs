use crate::frame::Frame;
use crate::track::{self, TrackWriter, VideoTrack};
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Webcam capture running on its own thread.
///
/// The camera handle stays on the capture thread; frames reach the pipeline
/// through a [`VideoTrack`] of capacity one, so the thread blocks while the
/// pipeline is busy with the previous frame.
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    frame_duration: Duration,
    started: Instant,
}

impl WebcamCapture {
    fn new(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}@{}",
            device_index,
            width,
            height,
            fps
        );

        let index = CameraIndex::Index(device_index);
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let native = camera.resolution();
        tracing::info!(
            "Webcam initialized successfully ({}x{} native)",
            native.width(),
            native.height()
        );

        Ok(Self {
            camera,
            width,
            height,
            frame_duration: Duration::from_secs_f32(1.0 / fps.max(1) as f32),
            started: Instant::now(),
        })
    }

    /// Open the camera on a capture thread and return the track it feeds.
    ///
    /// Frames carry the requested size as display size; the pipeline rescales
    /// when the device delivers something else.
    pub async fn spawn(device_index: u32, width: u32, height: u32, fps: u32) -> Result<VideoTrack> {
        let (mut writer, track) = track::channel(width, height, 1);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("webcam-capture".into())
            .spawn(move || match WebcamCapture::new(device_index, width, height, fps) {
                Ok(mut capture) => {
                    let _ = ready_tx.send(Ok(()));
                    capture.run(writer);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    writer.end();
                }
            })
            .context("Failed to spawn capture thread")?;

        ready_rx
            .await
            .context("Capture thread exited during startup")??;

        Ok(track)
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let timestamp = self.started.elapsed().as_micros() as u64;
        Ok(Frame::new(decoded, timestamp).with_display_size(self.width, self.height))
    }

    fn run(&mut self, mut writer: TrackWriter) {
        let mut frame_count = 0u64;

        while !writer.is_ended() {
            let loop_start = Instant::now();

            let frame = match self.capture_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!("Capture stopped: {:#}", err);
                    break;
                }
            };

            if let Err(err) = writer.blocking_send(frame) {
                tracing::debug!("Capture track closed: {:#}", err);
                break;
            }
            frame_count += 1;

            // Frame rate limiting
            let elapsed = loop_start.elapsed();
            if elapsed < self.frame_duration {
                std::thread::sleep(self.frame_duration - elapsed);
            }
        }

        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", err);
        }
        writer.end();
        tracing::info!("Webcam capture finished after {} frames", frame_count);
    }
}
