use clap::ValueEnum;
use image::{imageops, imageops::FilterType, GenericImageView, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use tracing::debug;

use crate::errors::{ReasonSegError, Result};
use crate::geometry::{GeometryRecord, ResizeLongestSide};
use crate::imageops_ext::mask::blend_masked;
use crate::inference::PredictedMask;

/// Frame in which the model expresses its mask.
///
/// Cropping the pad and resizing do not commute, so the layout is fixed once per run from
/// the model's configuration rather than guessed per mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaskLayout {
    /// The mask covers only the resized content, at any resolution with the same aspect
    /// ratio.
    #[default]
    PrePad,
    /// The mask covers the whole padded canvas at exactly `canvas_size`x`canvas_size`.
    Canvas,
}

/// Boolean mask at the original image resolution, stored as 8-bit luma (255 = selected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalMask(GrayImage);

impl FinalMask {
    /// Mask with nothing selected.
    pub fn empty(height: u32, width: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn is_selected(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] > 0
    }

    pub fn selected_count(&self) -> usize {
        self.0.pixels().filter(|p| p[0] > 0).count()
    }

    /// 8-bit rendering: 255 for selected pixels, 0 elsewhere.
    pub const fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// `score > 0` selects a pixel; zero itself does not.
pub fn threshold(score: f32) -> bool {
    score > 0.0
}

/// Projects model masks back onto the original pixel grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskProjector {
    layout: MaskLayout,
}

impl MaskProjector {
    pub const fn new(layout: MaskLayout) -> Self {
        Self { layout }
    }

    /// Brings `mask` into the resized region, thresholds it and resizes the boolean result
    /// to the original resolution with nearest-neighbor sampling.
    ///
    /// A missing mask yields an empty mask of the original size.
    pub fn project(
        &self,
        mask: Option<&PredictedMask>,
        geometry: &GeometryRecord,
    ) -> Result<FinalMask> {
        let (original_height, original_width) = geometry.original_size();
        let Some(mask) = mask else {
            debug!("No mask predicted, using empty mask");
            return Ok(FinalMask::empty(original_height, original_width));
        };

        let region = self.to_region(mask, geometry)?;
        let binary = GrayImage::from_fn(region.width(), region.height(), |x, y| {
            let Luma([score]) = *region.get_pixel(x, y);
            Luma([if threshold(score) { 255 } else { 0 }])
        });

        let projected = if binary.dimensions() == (original_width, original_height) {
            binary
        } else {
            imageops::resize(&binary, original_width, original_height, FilterType::Nearest)
        };
        Ok(FinalMask(projected))
    }

    /// Scores over exactly `resized_height`x`resized_width`.
    fn to_region(
        &self,
        mask: &PredictedMask,
        geometry: &GeometryRecord,
    ) -> Result<ImageBuffer<Luma<f32>, Vec<f32>>> {
        let (mask_height, mask_width) = mask.dimensions()?;
        let (resized_height, resized_width) = geometry.resized_size();
        let canvas = geometry.canvas_size();

        let scores = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
            mask_width,
            mask_height,
            mask.scores().iter().copied().collect(),
        )
        .ok_or_else(|| ReasonSegError::validation("predicted mask", "empty score buffer"))?;

        match self.layout {
            MaskLayout::Canvas => {
                if (mask_height, mask_width) != (canvas, canvas) {
                    return Err(ReasonSegError::GeometryMismatch {
                        layout: self.layout,
                        mask: (mask_height, mask_width),
                        expected: format!("{}x{}", canvas, canvas),
                    });
                }
                Ok(scores.view(0, 0, resized_width, resized_height).to_image())
            }
            MaskLayout::PrePad => {
                if !fits_region(mask_height, mask_width, resized_height, resized_width) {
                    return Err(ReasonSegError::GeometryMismatch {
                        layout: self.layout,
                        mask: (mask_height, mask_width),
                        expected: format!(
                            "aspect ratio of the {}x{} resized region",
                            resized_height, resized_width
                        ),
                    });
                }
                if (mask_height, mask_width) == (resized_height, resized_width) {
                    Ok(scores)
                } else {
                    Ok(imageops::resize(
                        &scores,
                        resized_width,
                        resized_height,
                        FilterType::Triangle,
                    ))
                }
            }
        }
    }
}

/// Whether a `mask_height`x`mask_width` mask is a rescaled copy of the resized region,
/// allowing one pixel of rounding on each axis.
fn fits_region(mask_height: u32, mask_width: u32, region_height: u32, region_width: u32) -> bool {
    ResizeLongestSide::new(region_height.max(region_width))
        .preprocess_shape(mask_height, mask_width)
        .map(|(height, width)| {
            height.abs_diff(region_height) <= 1 && width.abs_diff(region_width) <= 1
        })
        .unwrap_or(false)
}

pub const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Renders the visualization: selected pixels blended with a highlight color, all other
/// pixels copied from the image.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    highlight: Rgb<u8>,
    weight: f32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(HIGHLIGHT_COLOR)
    }
}

impl Compositor {
    pub const fn new(highlight: Rgb<u8>) -> Self {
        Self {
            highlight,
            weight: 0.5,
        }
    }

    pub fn composite(&self, image: &RgbImage, mask: &FinalMask) -> Result<RgbImage> {
        blend_masked(image, mask.as_image(), self.highlight, self.weight).ok_or_else(|| {
            ReasonSegError::validation(
                "final mask",
                format!(
                    "{}x{} does not match image {}x{}",
                    mask.width(),
                    mask.height(),
                    image.width(),
                    image.height()
                ),
            )
        })
    }
}
