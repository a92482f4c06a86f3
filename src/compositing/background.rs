use crate::error::{PipelineError, Result};
use image::{imageops, DynamicImage, RgbImage};
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

/// Blur radius used when none is given, in pixels
pub const DEFAULT_BLUR_RADIUS: f32 = 10.0;

/// What replaces the background behind the subject.
#[derive(Debug, Clone)]
pub enum BackgroundSpec {
    /// Gaussian blur of the current frame; the radius is the standard deviation
    Blur { radius: f32 },
    /// A decoded still image
    Replace { image: DynamicImage, fit: BackgroundFit },
}

impl BackgroundSpec {
    pub fn blur(radius: f32) -> Self {
        BackgroundSpec::Blur { radius }
    }

    pub fn replace(image: DynamicImage) -> Self {
        Self::replace_with_fit(image, BackgroundFit::default())
    }

    pub fn replace_with_fit(image: DynamicImage, fit: BackgroundFit) -> Self {
        BackgroundSpec::Replace { image, fit }
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::blur(DEFAULT_BLUR_RADIUS)
    }
}

/// How a still background is mapped onto the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundFit {
    /// Scale to the surface exactly, ignoring aspect ratio
    #[default]
    Stretch,
    /// Scale to fit inside, letter-boxed on black
    Contain,
    /// Scale to fill, cropping the overflow around the centre
    Cover,
}

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a still background comes from.
#[derive(Debug, Clone)]
pub enum BackgroundSource {
    File(PathBuf),
    Bytes(Vec<u8>),
    /// Fetched over HTTP(S) when decoded
    Url(String),
}

impl BackgroundSource {
    /// Treat `location` as a URL when it has an http(s) scheme, as a path
    /// otherwise.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            BackgroundSource::Url(location.to_string())
        } else {
            BackgroundSource::File(PathBuf::from(location))
        }
    }

    /// Load and decode the image.
    pub async fn decode(&self) -> Result<DynamicImage> {
        let image = match self {
            BackgroundSource::File(path) => {
                tracing::info!("Loading background image from {}", path.display());
                image::open(path)?
            }
            BackgroundSource::Bytes(bytes) => image::load_from_memory(bytes)?,
            BackgroundSource::Url(url) => {
                tracing::info!("Fetching background image from {}", url);
                let bytes = fetch(url)
                    .await
                    .map_err(|err| PipelineError::BackgroundFetch(format!("{url}: {err}")))?;
                image::load_from_memory(&bytes)?
            }
        };
        tracing::debug!("Background image decoded: {}x{}", image.width(), image.height());
        Ok(image)
    }
}

async fn fetch(url: &str) -> reqwest::Result<Vec<u8>> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// Background prepared for a fixed surface size.
#[derive(Debug)]
pub(crate) enum BackgroundLayer {
    Blur { sigma: f32 },
    Still(RgbImage),
}

impl BackgroundLayer {
    pub(crate) fn prepare(spec: &BackgroundSpec, width: u32, height: u32) -> Result<Self> {
        match spec {
            BackgroundSpec::Blur { radius } => {
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(PipelineError::InvalidConfig(format!(
                        "blur radius must be a non-negative number, got {radius}"
                    )));
                }
                Ok(BackgroundLayer::Blur { sigma: *radius })
            }
            BackgroundSpec::Replace { image, fit } => {
                if image.width() == 0 || image.height() == 0 {
                    return Err(PipelineError::InvalidConfig(
                        "background image is empty".to_string(),
                    ));
                }
                Ok(BackgroundLayer::Still(fit_image(
                    &image.to_rgb8(),
                    *fit,
                    width,
                    height,
                )))
            }
        }
    }

    /// Background pixels for one frame; `source` is already at surface size.
    pub(crate) fn render<'a>(&'a self, source: &RgbImage) -> Cow<'a, RgbImage> {
        match self {
            BackgroundLayer::Blur { sigma } if *sigma > 0.0 => {
                let _span = tracing::debug_span!("blur", sigma = *sigma).entered();
                Cow::Owned(imageops::blur(source, *sigma))
            }
            BackgroundLayer::Blur { .. } => Cow::Owned(source.clone()),
            BackgroundLayer::Still(image) => Cow::Borrowed(image),
        }
    }
}

fn fit_image(image: &RgbImage, fit: BackgroundFit, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = image.dimensions();
    if (src_width, src_height) == (width, height) {
        return image.clone();
    }

    let filter = imageops::FilterType::Triangle;
    match fit {
        BackgroundFit::Stretch => imageops::resize(image, width, height, filter),
        BackgroundFit::Contain => {
            let scale = f64::min(
                width as f64 / src_width as f64,
                height as f64 / src_height as f64,
            );
            let (scaled_width, scaled_height) = scaled(src_width, src_height, scale);
            let scaled_width = scaled_width.min(width);
            let scaled_height = scaled_height.min(height);
            let resized = imageops::resize(image, scaled_width, scaled_height, filter);

            let mut canvas = RgbImage::new(width, height);
            let x = (width - scaled_width) / 2;
            let y = (height - scaled_height) / 2;
            imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
            canvas
        }
        BackgroundFit::Cover => {
            let scale = f64::max(
                width as f64 / src_width as f64,
                height as f64 / src_height as f64,
            );
            let (scaled_width, scaled_height) = scaled(src_width, src_height, scale);
            let scaled_width = scaled_width.max(width);
            let scaled_height = scaled_height.max(height);
            let resized = imageops::resize(image, scaled_width, scaled_height, filter);

            let x = (scaled_width - width) / 2;
            let y = (scaled_height - height) / 2;
            imageops::crop_imm(&resized, x, y, width, height).to_image()
        }
    }
}

fn scaled(width: u32, height: u32, scale: f64) -> (u32, u32) {
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}
