//! Frame tracks: bounded channels carrying frames between a producer and a
//! consumer, with a shared live/ended state.
//!
//! The two ways a track ends differ. [`TrackHandle::stop`] ends it at once and
//! whatever is still buffered is discarded. [`TrackWriter::end`] closes the
//! producer side; the reader still drains the buffered frames and the track
//! reports `Ended` once it has seen the last one.

use crate::capture::FrameSource;
use crate::frame::Frame;
use crate::output::FrameSink;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// Cloneable control handle for a track.
#[derive(Debug, Clone)]
pub struct TrackHandle {
    id: u64,
    state: Arc<watch::Sender<TrackState>>,
}

impl TrackHandle {
    fn new() -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TrackState {
        *self.state.borrow()
    }

    pub fn is_ended(&self) -> bool {
        self.state() == TrackState::Ended
    }

    /// End the track. Frames still buffered are dropped (and released) with
    /// the channel; nothing is delivered to the reader afterwards.
    pub fn stop(&self) {
        if self.state.send_replace(TrackState::Ended) == TrackState::Live {
            tracing::debug!("Track {} stopped", self.id);
        }
    }

    fn subscribe(&self) -> watch::Receiver<TrackState> {
        self.state.subscribe()
    }
}

async fn wait_ended(state: &mut watch::Receiver<TrackState>) {
    loop {
        let ended = *state.borrow_and_update() == TrackState::Ended;
        if ended || state.changed().await.is_err() {
            return;
        }
    }
}

/// Create a track carrying frames of the given display resolution.
///
/// `capacity` bounds how many frames may sit between writer and reader; a
/// full channel makes the writer wait.
pub fn channel(width: u32, height: u32, capacity: usize) -> (TrackWriter, VideoTrack) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = TrackHandle::new();

    let writer = TrackWriter {
        tx: Some(tx),
        state: handle.subscribe(),
        handle: handle.clone(),
        resolution: (width, height),
    };
    let track = VideoTrack {
        rx,
        state: handle.subscribe(),
        handle,
        resolution: (width, height),
    };
    (writer, track)
}

/// Reading end of a track.
#[derive(Debug)]
pub struct VideoTrack {
    rx: mpsc::Receiver<Frame>,
    state: watch::Receiver<TrackState>,
    handle: TrackHandle,
    resolution: (u32, u32),
}

impl VideoTrack {
    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn handle(&self) -> TrackHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> TrackState {
        self.handle.state()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Next frame, or `None` once the track was stopped or its writer has
    /// ended and every buffered frame has been delivered.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.handle.is_ended() {
            return None;
        }

        tokio::select! {
            biased;
            _ = wait_ended(&mut self.state) => None,
            frame = self.rx.recv() => {
                if frame.is_none() {
                    self.handle.stop();
                }
                frame
            }
        }
    }
}

#[async_trait]
impl FrameSource for VideoTrack {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.recv().await)
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn stop(&mut self) {
        self.handle.stop();
    }
}

/// Writing end of a track.
#[derive(Debug)]
pub struct TrackWriter {
    tx: Option<mpsc::Sender<Frame>>,
    state: watch::Receiver<TrackState>,
    handle: TrackHandle,
    resolution: (u32, u32),
}

impl TrackWriter {
    pub fn handle(&self) -> TrackHandle {
        self.handle.clone()
    }

    /// Whether frames written now would be dropped.
    pub fn is_ended(&self) -> bool {
        self.tx.is_none() || self.handle.is_ended()
    }

    /// Finish the track from the producer side.
    ///
    /// Frames already queued stay readable.
    pub fn end(&mut self) {
        if self.tx.take().is_some() {
            tracing::debug!("Track {} finished by its producer", self.handle.id());
        }
    }

    /// Queue a frame, waiting for room.
    ///
    /// A frame sent to an ended track is dropped. Fails only when the reader
    /// has gone away, in which case the track is ended as well.
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Ok(());
        };
        if self.handle.is_ended() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = wait_ended(&mut self.state) => Ok(()),
            sent = tx.send(frame) => sent.map_err(|_| {
                self.handle.stop();
                anyhow!("track {} has no reader", self.handle.id())
            }),
        }
    }

    /// Blocking variant of [`TrackWriter::send`] for producer threads outside
    /// the async runtime.
    pub fn blocking_send(&self, frame: Frame) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Ok(());
        };
        if self.handle.is_ended() {
            return Ok(());
        }

        tx.blocking_send(frame).map_err(|_| {
            self.handle.stop();
            anyhow!("track {} has no reader", self.handle.id())
        })
    }
}

#[async_trait]
impl FrameSink for TrackWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.send(frame).await
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn is_closed(&self) -> bool {
        self.is_ended()
    }

    fn close(&mut self) {
        self.end();
    }
}

/// An ordered set of video tracks, the unit a session is started from.
#[derive(Default)]
pub struct MediaStream {
    video_tracks: Vec<Box<dyn FrameSource>>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_track<S: FrameSource + 'static>(track: S) -> Self {
        let mut stream = Self::new();
        stream.add_track(track);
        stream
    }

    pub fn add_track<S: FrameSource + 'static>(&mut self, track: S) {
        self.video_tracks.push(Box::new(track));
    }

    pub fn video_track_count(&self) -> usize {
        self.video_tracks.len()
    }

    /// Remove and return the first video track.
    pub fn take_first_video_track(&mut self) -> Option<Box<dyn FrameSource>> {
        if self.video_tracks.is_empty() {
            None
        } else {
            Some(self.video_tracks.remove(0))
        }
    }
}
