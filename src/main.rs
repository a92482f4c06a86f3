use anyhow::{Context, Result};
use backdrop_fx::capture::WebcamCapture;
use backdrop_fx::output::V4L2Output;
use backdrop_fx::segmentation::RobustVideoMatting;
use backdrop_fx::{
    BackgroundFit, BackgroundSource, BackgroundSpec, FrameSink, MediaStream, ModelVariant,
    OracleOptions, PassthroughOracle, SegmentationOracle, Session, SessionConfig,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<PathBuf>,

    /// Segmentation model input shape
    #[arg(long, value_enum, default_value_t = Variant::Landscape)]
    variant: Variant,

    /// Replace the background with this image (path or http(s) URL)
    /// instead of blurring it
    #[arg(long)]
    background: Option<String>,

    /// How the background image is fitted to the frame
    #[arg(long, value_enum, default_value_t = Fit::Stretch)]
    fit: Fit,

    /// Background blur radius in pixels
    #[arg(long, default_value_t = backdrop_fx::compositing::DEFAULT_BLUR_RADIUS)]
    blur_radius: f32,

    /// Do not mirror the picture (selfie view is the default)
    #[arg(long)]
    no_mirror: bool,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Variant {
    General,
    Landscape,
}

impl From<Variant> for ModelVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::General => ModelVariant::General,
            Variant::Landscape => ModelVariant::Landscape,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Fit {
    Stretch,
    Contain,
    Cover,
}

impl From<Fit> for BackgroundFit {
    fn from(fit: Fit) -> Self {
        match fit {
            Fit::Stretch => BackgroundFit::Stretch,
            Fit::Contain => BackgroundFit::Contain,
            Fit::Cover => BackgroundFit::Cover,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("backdrop-fx starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    // Everything runs on one thread; capture has its own.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let background = match &args.background {
        Some(location) => {
            let image = BackgroundSource::parse(location)
                .decode()
                .await
                .context("Failed to load background image")?;
            BackgroundSpec::replace_with_fit(image, args.fit.into())
        }
        None => BackgroundSpec::blur(args.blur_radius),
    };

    let oracle: Box<dyn SegmentationOracle> = match &args.model {
        Some(model_path) => Box::new(RobustVideoMatting::new(model_path)),
        None => Box::new(PassthroughOracle),
    };

    let config = SessionConfig {
        oracle: OracleOptions {
            model_variant: args.variant.into(),
            mirror_input: !args.no_mirror,
        },
        show_matte: args.show_matte,
        ..SessionConfig::default()
    };

    // Initialize capture
    let source = WebcamCapture::spawn(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.fps,
    )
    .await
    .context("Failed to initialize webcam capture")?;

    // Initialize output
    let mut output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let mut session = Session::new(oracle, config);
    let mut track = session
        .start(MediaStream::from_track(source), background)
        .await
        .context("Failed to start compositing session")?;

    tracing::info!("Press Ctrl+C to stop");

    let published = loop {
        let frame = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break Ok(());
            }
            frame = track.recv() => frame,
        };

        let Some(frame) = frame else {
            break Ok(());
        };
        if let Err(err) = output.write_frame(frame).await {
            break Err(err);
        }
    };

    session
        .stop()
        .await
        .context("Compositing session failed")?;
    published.context("Failed to write frame")
}
