//! Captured frames and the pixel operations the driver applies to them.

use image::imageops::{self, FilterType};
use image::RgbImage;
use stagefocus_common::error::{StagefocusError, StagefocusResult};
use stagefocus_framing::{CropRect, FrameSize};

/// One RGB frame with its position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    index: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Wrap tightly packed RGB bytes (`width * height * 3`).
    pub fn from_raw(index: u64, width: u32, height: u32, data: Vec<u8>) -> StagefocusResult<Self> {
        let len = data.len();
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            StagefocusError::capture(format!(
                "{len} bytes is not a {width}x{height} RGB frame"
            ))
        })?;
        Ok(Self::new(index, image))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width(), self.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Flip left to right, for a natural mirror-like preview.
    pub fn mirror_horizontal(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// Cut `rect` out of this frame and resample it to `output`.
    ///
    /// The result keeps this frame's index.
    pub fn crop_resize(&self, rect: CropRect, output: FrameSize) -> StagefocusResult<Frame> {
        if !rect.fits_within(self.size()) {
            return Err(StagefocusError::capture(format!(
                "Crop {}x{}+{}+{} does not fit a {}x{} frame",
                rect.width,
                rect.height,
                rect.x,
                rect.y,
                self.width(),
                self.height()
            )));
        }
        if !output.is_valid() {
            return Err(StagefocusError::capture(format!(
                "Cannot resample to {}x{}",
                output.width, output.height
            )));
        }

        let cropped =
            imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height).to_image();
        let image = if cropped.dimensions() == (output.width, output.height) {
            cropped
        } else {
            imageops::resize(&cropped, output.width, output.height, FilterType::Triangle)
        };
        Ok(Frame::new(self.index, image))
    }
}
