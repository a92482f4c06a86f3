//! Layered compositing of a frame, its mask and a background.
//!
//! Each frame goes through the same passes over one reusable RGBA surface:
//!
//! 1. clear to transparent
//! 2. draw the frame (source-over)
//! 3. keep it only where the mask is opaque (destination-in)
//! 4. draw the background underneath (destination-over)
//!
//! The surface is then flattened into a fresh RGB raster for the output frame.

mod background;

pub use background::{BackgroundFit, BackgroundSource, BackgroundSpec, DEFAULT_BLUR_RADIUS};

use crate::error::{PipelineError, Result};
use crate::segmentation::Mask;
use background::BackgroundLayer;
use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};
use std::borrow::Cow;

pub struct Compositor {
    surface: RgbaImage,
    background: BackgroundLayer,
}

impl Compositor {
    pub fn new(width: u32, height: u32, background: &BackgroundSpec) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::UnsupportedSurface { width, height });
        }

        let background = BackgroundLayer::prepare(background, width, height)?;
        tracing::debug!(
            "Composite surface {}x{} with {} background",
            width,
            height,
            background_kind(&background)
        );

        Ok(Self {
            surface: RgbaImage::new(width, height),
            background,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    /// Composite one frame.
    ///
    /// Frames and masks of a different size than the surface are scaled to it.
    pub fn compose(&mut self, source: &RgbImage, mask: &Mask) -> RgbImage {
        let _span = tracing::debug_span!("compose").entered();
        let (width, height) = self.dimensions();

        let source = if source.dimensions() == (width, height) {
            Cow::Borrowed(source)
        } else {
            Cow::Owned(imageops::resize(
                source,
                width,
                height,
                imageops::FilterType::Triangle,
            ))
        };
        let mask = if mask.dimensions() == (width, height) {
            Cow::Borrowed(mask)
        } else {
            Cow::Owned(mask.resized(width, height))
        };

        self.clear();
        self.draw_source_over(&source);
        self.keep_where_masked(&mask);
        let background = self.background.render(&source);
        draw_destination_over(&mut self.surface, &background);

        self.flatten()
    }

    fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw_source_over(&mut self, source: &RgbImage) {
        // An opaque source fully covers whatever is below it
        for (dst, src) in self.surface.pixels_mut().zip(source.pixels()) {
            *dst = Rgba([src[0], src[1], src[2], 255]);
        }
    }

    fn keep_where_masked(&mut self, mask: &Mask) {
        for (dst, alpha) in self.surface.pixels_mut().zip(mask.alphas()) {
            dst[3] = mul_div255(dst[3] as u32, alpha as u32);
        }
    }

    fn flatten(&self) -> RgbImage {
        let (width, height) = self.dimensions();
        let mut output = RgbImage::new(width, height);
        for (dst, src) in output.pixels_mut().zip(self.surface.pixels()) {
            *dst = Rgb([src[0], src[1], src[2]]);
        }
        output
    }
}

/// Paint an opaque layer behind the surface's current content.
fn draw_destination_over(surface: &mut RgbaImage, layer: &RgbImage) {
    for (dst, below) in surface.pixels_mut().zip(layer.pixels()) {
        let alpha = dst[3] as u32;
        for channel in 0..3 {
            dst[channel] = mul_div255(dst[channel] as u32, alpha)
                + mul_div255(below[channel] as u32, 255 - alpha);
        }
        dst[3] = 255;
    }
}

fn mul_div255(value: u32, factor: u32) -> u8 {
    ((value * factor + 127) / 255) as u8
}

fn background_kind(layer: &BackgroundLayer) -> &'static str {
    match layer {
        BackgroundLayer::Blur { .. } => "blur",
        BackgroundLayer::Still(_) => "still image",
    }
}
