use super::FrameSink;
use crate::frame::Frame;
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Writes frames to a v4l2loopback device as packed YUYV.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let applied = Output::set_format(&device, &Format::new(width, height, FourCC::new(b"YUYV")))
            .context("Failed to set YUYV output format")?;
        if (applied.width, applied.height) != (width, height) {
            tracing::warn!(
                "Loopback device negotiated {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;

        tracing::info!("v4l2loopback output ready");
        Ok(Self {
            file,
            width,
            height,
            packed: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

#[async_trait]
impl FrameSink for V4L2Output {
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let timestamp = frame.timestamp();
        let image = frame.into_image();
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            imageops::resize(
                &image,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            )
        };

        pack_yuyv(&image, &mut self.packed);
        self.file
            .write_all(&self.packed)
            .with_context(|| format!("Failed to write frame {timestamp} to loopback device"))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Pack an RGB raster as YUYV 4:2:2 into `out`, replacing its contents.
///
/// Each pixel pair shares the averaged chroma; an odd last column is paired
/// with itself.
fn pack_yuyv(image: &RgbImage, out: &mut Vec<u8>) {
    let (width, height) = image.dimensions();
    out.clear();
    out.reserve((width.div_ceil(2) * 4 * height) as usize);

    let row_len = width as usize * 3;
    if row_len == 0 {
        return;
    }
    for row in image.as_raw().chunks_exact(row_len) {
        let mut pairs = row.chunks_exact(6);
        for pair in &mut pairs {
            let (y0, u0, v0) = bt601(pair[0], pair[1], pair[2]);
            let (y1, u1, v1) = bt601(pair[3], pair[4], pair[5]);
            out.extend_from_slice(&[y0, avg(u0, u1), y1, avg(v0, v1)]);
        }
        if let [r, g, b] = *pairs.remainder() {
            let (y, u, v) = bt601(r, g, b);
            out.extend_from_slice(&[y, u, y, v]);
        }
    }
}

/// Full-range BT.601 in 8-bit fixed point.
fn bt601(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn avg(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) / 2) as u8
}
