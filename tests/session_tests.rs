//! Session lifecycle: start, stop, setup failures and end-to-end output.

mod common;

use backdrop_fx::track;
use backdrop_fx::{
    start_blur, start_replacement, BackgroundFit, BackgroundSource, BackgroundSpec, MediaStream,
    OracleOptions, PassthroughOracle, PipelineError, Session, SessionConfig, SessionState,
    TrackState,
};
use common::{checkerboard, ReleaseCounter, ScriptedOracle};
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;

fn unmirrored() -> SessionConfig {
    SessionConfig {
        oracle: OracleOptions {
            mirror_input: false,
            ..OracleOptions::default()
        },
        ..SessionConfig::default()
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn red_png() -> Vec<u8> {
    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])))
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .unwrap();
    encoded
}

#[tokio::test]
async fn blurs_border_and_keeps_centre_sharp() {
    let releases = ReleaseCounter::default();
    let (mut input, source) = track::channel(640, 480, 1);
    let mut session = Session::new(Box::new(ScriptedOracle::centre()), unmirrored());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::blur(10.0))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let original = checkerboard(640, 480);
    input
        .send(releases.frame(original.clone(), 1000))
        .await
        .unwrap();

    let frame = output.recv().await.unwrap();
    assert_eq!(frame.timestamp(), 1000);
    assert_eq!(releases.count(), 1);

    let blurred = imageops::blur(&original, 10.0);
    let composed = frame.image();
    // Centre is untouched
    for (x, y) in [(160, 120), (320, 240), (479, 359)] {
        assert_eq!(composed.get_pixel(x, y), original.get_pixel(x, y));
    }
    // Border is the blurred frame
    for (x, y) in [(0, 0), (5, 5), (639, 479), (320, 20), (20, 240)] {
        assert_eq!(composed.get_pixel(x, y), blurred.get_pixel(x, y));
    }
    let changed = (0..640)
        .filter(|&x| composed.get_pixel(x, 10) != original.get_pixel(x, 10))
        .count();
    assert!(changed > 0);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn replacement_with_empty_mask_shows_only_background() {
    let releases = ReleaseCounter::default();
    let (mut input, source) = track::channel(64, 48, 1);
    let (mut session, mut output) = start_replacement(
        MediaStream::from_track(source),
        Box::new(ScriptedOracle::background()),
        &BackgroundSource::Bytes(red_png()),
        BackgroundFit::Stretch,
        SessionConfig::default(),
    )
    .await
    .unwrap();

    input
        .send(releases.frame(checkerboard(64, 48), 42))
        .await
        .unwrap();

    let frame = output.recv().await.unwrap();
    assert_eq!(frame.timestamp(), 42);
    assert_eq!(frame.dimensions(), (64, 48));
    assert!(frame.image().pixels().all(|p| p.0 == [255, 0, 0]));

    session.stop().await.unwrap();
}

#[tokio::test]
async fn passthrough_returns_source_unchanged() {
    let (mut input, source) = track::channel(32, 24, 1);
    let (mut session, mut output) = start_blur(
        MediaStream::from_track(source),
        Box::new(PassthroughOracle),
        unmirrored(),
    )
    .await
    .unwrap();

    let original = checkerboard(32, 24);
    input
        .send(backdrop_fx::Frame::new(original.clone(), 7))
        .await
        .unwrap();

    let frame = output.recv().await.unwrap();
    assert_eq!(frame.timestamp(), 7);
    assert_eq!(frame.image(), &original);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn mirrored_session_flips_the_picture() {
    let (mut input, source) = track::channel(32, 24, 1);
    let (mut session, mut output) = start_blur(
        MediaStream::from_track(source),
        Box::new(PassthroughOracle),
        SessionConfig::default(),
    )
    .await
    .unwrap();

    let original = checkerboard(32, 24);
    input
        .send(backdrop_fx::Frame::new(original.clone(), 7))
        .await
        .unwrap();

    let frame = output.recv().await.unwrap();
    assert_eq!(frame.image(), &imageops::flip_horizontal(&original));

    session.stop().await.unwrap();
}

#[tokio::test]
async fn stop_twice_closes_oracle_once() {
    let oracle = ScriptedOracle::foreground();
    let probe = oracle.probe();
    let (_input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    session.stop().await.unwrap();
    session.stop().await.unwrap();

    assert_eq!(probe.configures(), 1);
    assert_eq!(probe.closes(), 1);
    assert_eq!(output.state(), TrackState::Ended);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let (_input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(ScriptedOracle::foreground()), SessionConfig::default());
    let _output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    let (_input2, again) = track::channel(16, 12, 1);
    let err = session
        .start(MediaStream::from_track(again), BackgroundSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyStarted));
    assert!(session.is_running());

    session.stop().await.unwrap();

    let (_input3, after_stop) = track::channel(16, 12, 1);
    let err = session
        .start(MediaStream::from_track(after_stop), BackgroundSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyStarted));
}

#[tokio::test]
async fn empty_stream_is_a_setup_error() {
    let oracle = ScriptedOracle::foreground();
    let probe = oracle.probe();
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());

    let err = session
        .start(MediaStream::new(), BackgroundSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoVideoTrack));
    assert!(err.is_setup());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(probe.configures(), 0);
}

#[tokio::test]
async fn oracle_setup_failure_leaves_nothing_running() {
    let oracle = ScriptedOracle::foreground().failing_configure();
    let probe = oracle.probe();
    let (_input, source) = track::channel(16, 12, 1);
    let source_handle = source.handle();
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());

    let err = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::OracleSetup(ref msg) if msg.contains("unreachable")));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_running());
    assert_eq!(probe.submits(), 0);
    // Nothing to tear down
    session.stop().await.unwrap();
    assert_eq!(probe.closes(), 0);
    assert_eq!(source_handle.state(), TrackState::Live);
}

#[tokio::test]
async fn zero_sized_source_is_rejected() {
    let (_input, source) = track::channel(0, 0, 1);
    let mut session = Session::new(Box::new(ScriptedOracle::foreground()), SessionConfig::default());

    let err = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnsupportedSurface { .. }));
}

#[tokio::test]
async fn zero_output_capacity_is_rejected() {
    let (_input, source) = track::channel(16, 12, 1);
    let config = SessionConfig {
        output_capacity: 0,
        ..SessionConfig::default()
    };
    let mut session = Session::new(Box::new(ScriptedOracle::foreground()), config);

    let err = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidConfig(_)));
}

#[tokio::test]
async fn broken_background_image_fails_before_start() {
    let oracle = ScriptedOracle::foreground();
    let probe = oracle.probe();
    let (_input, source) = track::channel(16, 12, 1);

    let result = start_replacement(
        MediaStream::from_track(source),
        Box::new(oracle),
        &BackgroundSource::Bytes(vec![0, 1, 2, 3]),
        BackgroundFit::Cover,
        SessionConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Background(_))));
    assert_eq!(probe.configures(), 0);
}

#[tokio::test]
async fn stop_during_inflight_frame_emits_nothing_afterwards() {
    let releases = ReleaseCounter::default();
    let gate = Arc::new(Semaphore::new(0));
    let oracle = ScriptedOracle::foreground().gated(Arc::clone(&gate));
    let probe = oracle.probe();

    let (mut input, source) = track::channel(16, 12, 1);
    let source_handle = source.handle();
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::blur(2.0))
        .await
        .unwrap();
    let output_handle = output.handle();

    input
        .send(releases.frame(checkerboard(16, 12), 500))
        .await
        .unwrap();
    while probe.submits() == 0 {
        tokio::task::yield_now().await;
    }

    let stopper = tokio::spawn(async move {
        let result = session.stop().await;
        (session, result)
    });
    while output_handle.state() != TrackState::Ended {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);

    let (session, result) = stopper.await.unwrap();
    assert!(result.is_ok());
    assert!(output.recv().await.is_none());
    assert_eq!(releases.count(), 1);
    assert_eq!(source_handle.state(), TrackState::Ended);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn inference_failure_ends_output_and_is_reported_by_stop() {
    let releases = ReleaseCounter::default();
    let oracle = ScriptedOracle::foreground().failing_submit_at(0);
    let probe = oracle.probe();

    let (mut input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    input
        .send(releases.frame(checkerboard(16, 12), 1))
        .await
        .unwrap();

    assert!(output.recv().await.is_none());
    assert_eq!(releases.count(), 1);
    assert!(input.is_ended());

    let err = session.stop().await.unwrap_err();
    assert!(matches!(err, PipelineError::Inference(_)));
    assert_eq!(probe.closes(), 1);
    assert!(session.stop().await.is_ok());
}

#[tokio::test]
async fn aborted_run_no_longer_reports_running() {
    let oracle = ScriptedOracle::foreground().failing_submit_at(0);
    let (mut input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();
    assert!(session.is_running());

    input
        .send(backdrop_fx::Frame::new(checkerboard(16, 12), 1))
        .await
        .unwrap();
    assert!(output.recv().await.is_none());
    settle().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_running());
    assert!(matches!(
        session.stop().await,
        Err(PipelineError::Inference(_))
    ));
}

#[tokio::test]
async fn frames_forwarded_before_source_end_are_delivered() {
    let (mut input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(ScriptedOracle::foreground()), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    input
        .send(backdrop_fx::Frame::new(checkerboard(16, 12), 77))
        .await
        .unwrap();
    drop(input);
    settle().await;

    assert_eq!(output.recv().await.map(|frame| frame.timestamp()), Some(77));
    assert!(output.recv().await.is_none());
    assert_eq!(output.state(), TrackState::Ended);
    assert_eq!(session.state(), SessionState::Idle);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_background_url_fails_before_configure() {
    let oracle = ScriptedOracle::foreground();
    let probe = oracle.probe();
    let (_input, source) = track::channel(16, 12, 1);

    let result = start_replacement(
        MediaStream::from_track(source),
        Box::new(oracle),
        &BackgroundSource::Url("http://127.0.0.1:9/background.jpg".to_string()),
        BackgroundFit::Stretch,
        SessionConfig::default(),
    )
    .await;

    match result {
        Err(err) => {
            assert!(matches!(err, PipelineError::BackgroundFetch(_)));
            assert!(err.is_setup());
        }
        Ok(_) => panic!("session started without a background"),
    }
    assert_eq!(probe.configures(), 0);
}

#[tokio::test]
async fn close_failure_does_not_block_teardown() {
    let oracle = ScriptedOracle::foreground().failing_close();
    let probe = oracle.probe();
    let (_input, source) = track::channel(16, 12, 1);
    let source_handle = source.handle();
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    assert!(session.stop().await.is_ok());
    assert_eq!(probe.closes(), 1);
    assert_eq!(output.state(), TrackState::Ended);
    assert_eq!(source_handle.state(), TrackState::Ended);
}

#[tokio::test]
async fn slow_consumer_backpressures_the_pipeline() {
    let releases = ReleaseCounter::default();
    let oracle = ScriptedOracle::foreground();
    let probe = oracle.probe();

    let (mut input, source) = track::channel(16, 12, 4);
    let mut session = Session::new(Box::new(oracle), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    for ts in 0..4 {
        input
            .send(releases.frame(checkerboard(16, 12), ts))
            .await
            .unwrap();
    }
    settle().await;

    // One frame waits on the output track, one is blocked writing it
    assert_eq!(probe.submits(), 2);
    assert_eq!(releases.count(), 2);

    for ts in 0..4 {
        assert_eq!(output.recv().await.unwrap().timestamp(), ts);
    }
    session.stop().await.unwrap();
    assert_eq!(releases.count(), 4);
}

#[tokio::test]
async fn dropping_a_running_session_ends_its_output() {
    let (_input, source) = track::channel(16, 12, 1);
    let mut session = Session::new(Box::new(ScriptedOracle::foreground()), SessionConfig::default());
    let mut output = session
        .start(MediaStream::from_track(source), BackgroundSpec::default())
        .await
        .unwrap();

    drop(session);
    assert!(output.recv().await.is_none());
}
