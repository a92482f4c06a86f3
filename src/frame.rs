use image::{imageops, RgbImage};
use std::fmt;

/// Callback returning a frame's native buffer to whoever produced it.
pub type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// A single timestamped video frame with exclusive ownership.
///
/// The raster is stored at its coded size; `display_size` is the size the
/// producer intends it to be shown at. The release hook fires exactly once,
/// on [`Frame::close`] or when the frame is dropped, so a frame that is lost on
/// an error path still hands its buffer back.
pub struct Frame {
    image: RgbImage,
    display_width: u32,
    display_height: u32,
    /// Presentation timestamp in microseconds
    timestamp: u64,
    release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: u64) -> Self {
        let (display_width, display_height) = image.dimensions();
        Self {
            image,
            display_width,
            display_height,
            timestamp,
            release: None,
        }
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Coded dimensions of the raster
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Rescale the raster to its display size.
    ///
    /// Returns `true` when the raster was resampled. A zero display size is
    /// treated as "same as coded".
    pub fn normalize(&mut self) -> bool {
        let target = (self.display_width, self.display_height);
        if target.0 == 0 || target.1 == 0 || self.image.dimensions() == target {
            return false;
        }

        self.image = imageops::resize(
            &self.image,
            target.0,
            target.1,
            imageops::FilterType::Triangle,
        );
        true
    }

    /// Take the raster out of the frame, releasing the native buffer.
    pub fn into_image(mut self) -> RgbImage {
        std::mem::replace(&mut self.image, RgbImage::new(0, 0))
    }

    /// Release the frame now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("dimensions", &self.image.dimensions())
            .field("display_size", &self.display_size())
            .field("timestamp", &self.timestamp)
            .field("releasable", &self.release.is_some())
            .finish()
    }
}
