use image::RgbImage;
use ndarray::prelude::*;
use nshare::AsNdarray3;
use tracing::debug;

use crate::errors::{ReasonSegError, Result};

/// Per-channel mean of the segmentation backbone, RGB order, 0..255 scale.
pub const SAM_PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
/// Per-channel standard deviation of the segmentation backbone, RGB order, 0..255 scale.
pub const SAM_PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Normalized, zero-padded `(3, T, T)` input of the segmentation backbone.
///
/// The resized content occupies `[.., 0..resized_height, 0..resized_width]`; everything
/// below and to the right of it is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SamTensor(Array3<f32>);

impl SamTensor {
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    pub fn canvas_size(&self) -> usize {
        self.0.shape()[1]
    }

    /// `(1, 3, T, T)` copy for runtimes that expect a batch axis.
    pub fn to_batched(&self) -> Array4<f32> {
        self.0.clone().insert_axis(Axis(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamNormalizer {
    canvas_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl SamNormalizer {
    pub const fn new(canvas_size: u32) -> Self {
        Self {
            canvas_size,
            mean: SAM_PIXEL_MEAN,
            std: SAM_PIXEL_STD,
        }
    }

    pub const fn with_constants(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub const fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    /// Normalizes `resized` per channel and pads it with zeros on the bottom and right
    /// edges up to the square canvas.
    pub fn encode(&self, resized: &RgbImage) -> Result<SamTensor> {
        let (width, height) = resized.dimensions();
        if width > self.canvas_size || height > self.canvas_size {
            return Err(ReasonSegError::validation(
                "resized image",
                format!(
                    "{}x{} does not fit a {}x{} canvas",
                    width, height, self.canvas_size, self.canvas_size
                ),
            ));
        }

        let mut normalized = resized.as_ndarray3().mapv(f32::from);
        for (channel, mut plane) in normalized.axis_iter_mut(Axis(0)).enumerate() {
            let (mean, std) = (self.mean[channel], self.std[channel]);
            plane.mapv_inplace(|v| (v - mean) / std);
        }

        let size = self.canvas_size as usize;
        let mut canvas = Array3::<f32>::zeros((3, size, size));
        canvas
            .slice_mut(s![.., ..height as usize, ..width as usize])
            .assign(&normalized);

        debug!(
            "Normalized {}x{} into {}x{} canvas",
            width, height, self.canvas_size, self.canvas_size
        );
        Ok(SamTensor(canvas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_output_shape_is_square_canvas() -> Result<()> {
        let normalizer = SamNormalizer::new(16);
        for (w, h) in [(16, 12), (12, 16), (16, 16), (16, 1)] {
            let tensor = normalizer.encode(&RgbImage::new(w, h))?;
            assert_eq!(tensor.view().shape(), &[3, 16, 16]);
            assert_eq!(tensor.canvas_size(), 16);
        }
        Ok(())
    }

    #[test]
    fn test_channel_normalization() -> Result<()> {
        let normalizer = SamNormalizer::new(4);
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 128, 0]));
        let tensor = normalizer.encode(&image)?;
        let view = tensor.view();

        let expected = [
            (255.0 - SAM_PIXEL_MEAN[0]) / SAM_PIXEL_STD[0],
            (128.0 - SAM_PIXEL_MEAN[1]) / SAM_PIXEL_STD[1],
            (0.0 - SAM_PIXEL_MEAN[2]) / SAM_PIXEL_STD[2],
        ];
        for (c, value) in expected.iter().enumerate() {
            assert!((view[[c, 2, 3]] - value).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_padding_only_on_bottom_and_right() -> Result<()> {
        let normalizer = SamNormalizer::new(8);
        let image = RgbImage::from_pixel(8, 5, Rgb([200, 200, 200]));
        let tensor = normalizer.encode(&image)?;
        let view = tensor.view();

        // content starts at the origin
        assert!(view[[0, 0, 0]] > 0.0);
        assert!(view[[0, 4, 7]] > 0.0);
        // pad rows are exactly zero, not normalized black
        assert!(view.slice(s![.., 5.., ..]).iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn test_square_input_adds_no_padding() -> Result<()> {
        let normalizer = SamNormalizer::new(6);
        let image = RgbImage::from_pixel(6, 6, Rgb([255, 255, 255]));
        let tensor = normalizer.encode(&image)?;
        assert!(tensor.view().iter().all(|&v| v > 0.0));
        Ok(())
    }

    #[test]
    fn test_oversized_input_rejected() {
        let normalizer = SamNormalizer::new(8);
        let result = normalizer.encode(&RgbImage::new(9, 4));
        assert!(matches!(result, Err(ReasonSegError::Validation { .. })));
    }

    #[test]
    fn test_custom_constants() -> Result<()> {
        let normalizer = SamNormalizer::new(2).with_constants([100.0; 3], [2.0; 3]);
        let tensor = normalizer.encode(&RgbImage::from_pixel(2, 1, Rgb([110, 100, 90])))?;
        let view = tensor.view();
        assert_eq!(view[[0, 0, 1]], 5.0);
        assert_eq!(view[[1, 0, 0]], 0.0);
        assert_eq!(view[[2, 0, 0]], -5.0);
        assert_eq!(view[[0, 1, 0]], 0.0);
        Ok(())
    }

    #[test]
    fn test_batched_shape() -> Result<()> {
        let tensor = SamNormalizer::new(4).encode(&RgbImage::new(4, 2))?;
        assert_eq!(tensor.to_batched().shape(), &[1, 3, 4, 4]);
        Ok(())
    }
}
