use image::{imageops, imageops::FilterType, RgbImage};
use tracing::debug;

use crate::errors::{ReasonSegError, Result};

/// Bookkeeping needed to project a mask predicted on the padded canvas back onto the
/// original pixel grid.
///
/// Only [`ResizeLongestSide`] constructs it, so `max(resized_height, resized_width)` is
/// always `canvas_size` and neither resized side exceeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRecord {
    original_height: u32,
    original_width: u32,
    resized_height: u32,
    resized_width: u32,
    canvas_size: u32,
}

impl GeometryRecord {
    /// Sizes are (height, width). Every side must be non-zero and the resized region must
    /// fit inside the canvas.
    pub(crate) fn new(
        original: (u32, u32),
        resized: (u32, u32),
        canvas_size: u32,
    ) -> Result<Self> {
        let (original_height, original_width) = original;
        let (resized_height, resized_width) = resized;
        let sides = [original_height, original_width, resized_height, resized_width];
        if sides.contains(&0) {
            return Err(ReasonSegError::validation(
                "geometry",
                format!(
                    "zero-sized side in original {}x{} or resized {}x{}",
                    original_height, original_width, resized_height, resized_width
                ),
            ));
        }
        if resized_height > canvas_size || resized_width > canvas_size {
            return Err(ReasonSegError::validation(
                "geometry",
                format!(
                    "resized region {}x{} exceeds the {}x{} canvas",
                    resized_height, resized_width, canvas_size, canvas_size
                ),
            ));
        }
        Ok(Self {
            original_height,
            original_width,
            resized_height,
            resized_width,
            canvas_size,
        })
    }

    /// (height, width) of the ingested image
    pub const fn original_size(&self) -> (u32, u32) {
        (self.original_height, self.original_width)
    }

    /// (height, width) of the unpadded region inside the canvas
    pub const fn resized_size(&self) -> (u32, u32) {
        (self.resized_height, self.resized_width)
    }

    pub const fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    /// Rows of zero padding added below the resized content.
    pub const fn pad_bottom(&self) -> u32 {
        self.canvas_size - self.resized_height
    }

    /// Columns of zero padding added right of the resized content.
    pub const fn pad_right(&self) -> u32 {
        self.canvas_size - self.resized_width
    }
}

/// Resizes images so that their longest side equals `target_length`, keeping the aspect
/// ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeLongestSide {
    target_length: u32,
}

impl ResizeLongestSide {
    pub const fn new(target_length: u32) -> Self {
        Self { target_length }
    }

    pub const fn target_length(&self) -> u32 {
        self.target_length
    }

    /// Output (height, width) for an input of the given size.
    ///
    /// The long side maps to exactly `target_length`; the short side is rounded half-up
    /// in integer arithmetic and never drops below one pixel.
    pub fn preprocess_shape(&self, height: u32, width: u32) -> Result<(u32, u32)> {
        if height == 0 || width == 0 {
            return Err(ReasonSegError::invalid_image(
                "unknown",
                format!("zero-sized dimensions {}x{}", width, height),
            ));
        }
        if self.target_length == 0 {
            return Err(ReasonSegError::validation(
                "image_size",
                "must be greater than zero",
            ));
        }

        let target = u64::from(self.target_length);
        let scale_short = |short: u32, long: u32| -> u32 {
            let (short, long) = (u64::from(short), u64::from(long));
            let rounded = (2 * short * target + long) / (2 * long);
            rounded.max(1) as u32
        };

        let shape = if height >= width {
            (self.target_length, scale_short(width, height))
        } else {
            (scale_short(height, width), self.target_length)
        };
        Ok(shape)
    }

    /// Resizes `image` and records both the original and the resized shape.
    ///
    /// Shrinking uses area averaging and enlarging uses linear interpolation, so the same
    /// input always produces the same pixels. An image already at its target shape is
    /// returned unchanged.
    pub fn apply_image(&self, image: &RgbImage) -> Result<(RgbImage, GeometryRecord)> {
        let (width, height) = image.dimensions();
        let (resized_height, resized_width) = self.preprocess_shape(height, width)?;

        let resized = if (resized_width, resized_height) == (width, height) {
            image.clone()
        } else if resized_width <= width && resized_height <= height {
            imageops::thumbnail(image, resized_width, resized_height)
        } else {
            imageops::resize(image, resized_width, resized_height, FilterType::Triangle)
        };

        debug!(
            "Resized {}x{} -> {}x{} (longest side {})",
            width, height, resized_width, resized_height, self.target_length
        );

        let geometry = GeometryRecord::new(
            (height, width),
            (resized_height, resized_width),
            self.target_length,
        )?;
        Ok((resized, geometry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_record_rejects_region_outside_canvas() {
        let result = GeometryRecord::new((8, 8), (9, 8), 8);
        assert!(matches!(result, Err(ReasonSegError::Validation { .. })));
        let result = GeometryRecord::new((8, 8), (8, 0), 8);
        assert!(matches!(result, Err(ReasonSegError::Validation { .. })));

        let record = GeometryRecord::new((8, 8), (8, 8), 8).unwrap();
        assert_eq!((record.pad_bottom(), record.pad_right()), (0, 0));
    }

    #[test]
    fn test_landscape_shape() -> Result<()> {
        let transform = ResizeLongestSide::new(1024);
        assert_eq!(transform.preprocess_shape(480, 640)?, (768, 1024));
        Ok(())
    }

    #[test]
    fn test_portrait_shape() -> Result<()> {
        let transform = ResizeLongestSide::new(1024);
        assert_eq!(transform.preprocess_shape(640, 480)?, (1024, 768));
        Ok(())
    }

    #[test]
    fn test_square_shape() -> Result<()> {
        let transform = ResizeLongestSide::new(1024);
        for size in [1, 7, 333, 1024, 4096] {
            assert_eq!(transform.preprocess_shape(size, size)?, (1024, 1024));
        }
        Ok(())
    }

    #[test]
    fn test_longest_side_invariant() -> Result<()> {
        let transform = ResizeLongestSide::new(1024);
        for (h, w) in [(1, 5000), (3, 7), (999, 1000), (1080, 1920), (4000, 3), (577, 433)] {
            let (rh, rw) = transform.preprocess_shape(h, w)?;
            assert_eq!(rh.max(rw), 1024, "{}x{}", h, w);
            assert!(rh >= 1 && rw >= 1);
        }
        Ok(())
    }

    #[test]
    fn test_short_side_rounds_half_up() -> Result<()> {
        // 3 * 10 / 4 = 7.5
        let transform = ResizeLongestSide::new(10);
        assert_eq!(transform.preprocess_shape(3, 4)?, (8, 10));
        // 1 * 10 / 3 = 3.33..
        assert_eq!(transform.preprocess_shape(1, 3)?, (3, 10));
        Ok(())
    }

    #[test]
    fn test_zero_sized_image_is_invalid() {
        let transform = ResizeLongestSide::new(1024);
        let err = transform.preprocess_shape(0, 10).unwrap_err();
        assert!(matches!(err, ReasonSegError::InvalidImage { .. }));

        let empty = RgbImage::new(0, 0);
        assert!(matches!(
            transform.apply_image(&empty),
            Err(ReasonSegError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_apply_image_records_geometry() -> Result<()> {
        let transform = ResizeLongestSide::new(64);
        let (resized, geometry) = transform.apply_image(&gradient(40, 30))?;

        assert_eq!(resized.dimensions(), (64, 48));
        assert_eq!(geometry.original_size(), (30, 40));
        assert_eq!(geometry.resized_size(), (48, 64));
        assert_eq!(geometry.pad_bottom(), 16);
        assert_eq!(geometry.pad_right(), 0);
        Ok(())
    }

    #[test]
    fn test_downscale_uses_resized_shape() -> Result<()> {
        let transform = ResizeLongestSide::new(32);
        let (resized, geometry) = transform.apply_image(&gradient(128, 64))?;
        assert_eq!(resized.dimensions(), (32, 16));
        assert_eq!(geometry.resized_size(), (16, 32));
        Ok(())
    }

    #[test]
    fn test_idempotent_on_already_resized_image() -> Result<()> {
        let transform = ResizeLongestSide::new(64);
        let (once, first) = transform.apply_image(&gradient(50, 37))?;
        let (twice, second) = transform.apply_image(&once)?;

        assert_eq!(second.resized_size(), first.resized_size());
        assert_eq!(second.original_size(), first.resized_size());
        assert_eq!(once, twice);
        Ok(())
    }
}
