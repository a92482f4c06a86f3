use crate::error::{PipelineError, Result as PipelineResult};
use anyhow::Result;
use async_trait::async_trait;
use image::{imageops, ImageBuffer, Luma, RgbImage};

type MaskBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Foreground opacity per pixel: 0.0 = background, 1.0 = foreground.
/// Dimensions match the frame the mask was produced from.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    buffer: MaskBuffer,
}

impl Mask {
    /// Build a mask from row-major values.
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> PipelineResult<Self> {
        let expected = width as usize * height as usize;
        let actual = values.len();
        ImageBuffer::from_raw(width, height, values)
            .map(|buffer| Self { buffer })
            .ok_or(PipelineError::MaskSize { expected, actual })
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            buffer: ImageBuffer::from_pixel(width, height, Luma([value])),
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> f32,
    {
        Self {
            buffer: ImageBuffer::from_fn(width, height, |x, y| Luma([f(x, y)])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.buffer.get_pixel(x, y)[0]
    }

    /// Opacity at a pixel quantised to 0..=255.
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        to_alpha(self.value(x, y))
    }

    pub(crate) fn alphas(&self) -> impl Iterator<Item = u8> + '_ {
        self.buffer.pixels().map(|p| to_alpha(p[0]))
    }

    /// Resample to another size with bilinear filtering.
    pub fn resized(&self, width: u32, height: u32) -> Mask {
        if self.dimensions() == (width, height) {
            return self.clone();
        }

        let mut buffer = imageops::resize(&self.buffer, width, height, imageops::FilterType::Triangle);
        for pixel in buffer.pixels_mut() {
            pixel[0] = pixel[0].clamp(0.0, 1.0);
        }
        Mask { buffer }
    }

    /// Grayscale rendering of the mask for visual debugging.
    pub fn to_rgb_image(&self) -> RgbImage {
        let (width, height) = self.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            let value = self.alpha(x, y);
            image::Rgb([value, value, value])
        })
    }
}

fn to_alpha(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Segmentation model family to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVariant {
    /// Square input, works for any framing
    General,
    /// Wide input tuned for landscape webcam framing
    #[default]
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleOptions {
    pub model_variant: ModelVariant,
    /// Frames are mirrored (selfie view) before they are submitted
    pub mirror_input: bool,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            model_variant: ModelVariant::Landscape,
            mirror_input: true,
        }
    }
}

/// Trait for person/background segmentation backends.
///
/// An oracle is stateful and single-flight: `submit` is never called again
/// before the previous call has returned, and one instance is never shared
/// between sessions.
#[async_trait]
pub trait SegmentationOracle: Send {
    /// Apply options and load whatever the backend needs.
    ///
    /// Called once when a session starts; a failure here is a setup error.
    /// When `mirror_input` is set the frames handed to `submit` are already
    /// mirrored, implementations must not flip them again.
    async fn configure(&mut self, options: &OracleOptions) -> Result<()>;

    /// Segment one frame
    ///
    /// # Returns
    /// * Mask for exactly this frame, same dimensions as `frame`
    async fn submit(&mut self, frame: &RgbImage) -> Result<Mask>;

    /// Release native resources. No result is produced afterwards.
    async fn close(&mut self) -> Result<()>;
}
