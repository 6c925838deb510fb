use std::path::Path;

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{ReasonSegError, Result};
use crate::imageops_ext::padding::pad_centered;
use crate::traits::EncoderPreprocessor;

pub const OPENAI_CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const OPENAI_CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Fixed-resolution `(3, H, W)` input of the vision-language encoder.
///
/// Kept apart from [`crate::normalize::SamTensor`]: both are `f32` planes, but they are
/// normalized with different constants and live in different coordinate frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipTensor(Array3<f32>);

impl ClipTensor {
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    /// (height, width)
    pub fn resolution(&self) -> (usize, usize) {
        let shape = self.0.shape();
        (shape[1], shape[2])
    }

    pub fn to_batched(&self) -> Array4<f32> {
        self.0.clone().insert_axis(Axis(0))
    }
}

/// Size entry of a `preprocessor_config.json`.
///
/// Older configs store a bare integer, newer ones an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Square(u32),
    ShortestEdge { shortest_edge: u32 },
    Exact { height: u32, width: u32 },
}

impl SizeSpec {
    /// (height, width) when the entry is read as a crop size.
    const fn as_crop(self) -> (u32, u32) {
        match self {
            Self::Square(size) | Self::ShortestEdge { shortest_edge: size } => (size, size),
            Self::Exact { height, width } => (height, width),
        }
    }
}

/// Configuration of the CLIP-style encoder preprocessor, deserializable from a Hugging
/// Face `preprocessor_config.json`. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClipPreprocessorConfig {
    pub do_resize: bool,
    pub size: SizeSpec,
    /// PIL resampling code
    pub resample: u8,
    pub do_center_crop: bool,
    pub crop_size: SizeSpec,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for ClipPreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: SizeSpec::ShortestEdge { shortest_edge: 224 },
            resample: 3,
            do_center_crop: true,
            crop_size: SizeSpec::Exact {
                height: 224,
                width: 224,
            },
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: OPENAI_CLIP_MEAN,
            image_std: OPENAI_CLIP_STD,
        }
    }
}

impl ClipPreprocessorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ReasonSegError::FileSystem {
            path: path.to_path_buf(),
            operation: "read encoder preprocessor config".to_string(),
            source: e,
        })?;
        Self::from_json_str(&json)
    }

    /// The output must not depend on the input aspect ratio, so either a center crop or an
    /// exact resize is required.
    pub fn validate(&self) -> Result<()> {
        let fixed_resize = self.do_resize && matches!(self.size, SizeSpec::Exact { .. });
        if !self.do_center_crop && !fixed_resize {
            return Err(ReasonSegError::Configuration {
                message: "encoder preprocessor needs do_center_crop or an exact resize size"
                    .to_string(),
            });
        }
        if self.image_std.iter().any(|&s| s == 0.0) {
            return Err(ReasonSegError::Configuration {
                message: "encoder preprocessor image_std contains zero".to_string(),
            });
        }
        let (height, width) = self.output_resolution();
        if height == 0 || width == 0 {
            return Err(ReasonSegError::Configuration {
                message: "encoder preprocessor resolution must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// (height, width) of every tensor this configuration produces.
    pub const fn output_resolution(&self) -> (u32, u32) {
        if self.do_center_crop {
            self.crop_size.as_crop()
        } else {
            self.size.as_crop()
        }
    }

    fn filter(&self) -> FilterType {
        match self.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            3 => FilterType::CatmullRom,
            _ => FilterType::Triangle,
        }
    }

    /// (height, width) after the resize step.
    fn resize_shape(&self, height: u32, width: u32) -> (u32, u32) {
        match self.size {
            SizeSpec::Square(edge) | SizeSpec::ShortestEdge { shortest_edge: edge } => {
                let (short, long) = (height.min(width), height.max(width));
                // truncating division, matching the reference processor
                let scaled_long = (u64::from(edge) * u64::from(long) / u64::from(short)) as u32;
                if height <= width {
                    (edge, scaled_long)
                } else {
                    (scaled_long, edge)
                }
            }
            SizeSpec::Exact { height, width } => (height, width),
        }
    }
}

/// Resize / center-crop / rescale / normalize preprocessor of the vision-language encoder.
#[derive(Debug, Clone, Default)]
pub struct ClipImageProcessor {
    config: ClipPreprocessorConfig,
}

impl ClipImageProcessor {
    pub fn new(config: ClipPreprocessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &ClipPreprocessorConfig {
        &self.config
    }
}

impl EncoderPreprocessor for ClipImageProcessor {
    fn preprocess(&self, image: &RgbImage) -> Result<ClipTensor> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ReasonSegError::invalid_image(
                "unknown",
                format!("zero-sized dimensions {}x{}", width, height),
            ));
        }
        let config = &self.config;

        let resized = if config.do_resize {
            let (new_height, new_width) = config.resize_shape(height, width);
            imageops::resize(image, new_width, new_height, config.filter())
        } else {
            image.clone()
        };

        let cropped = if config.do_center_crop {
            let (crop_height, crop_width) = config.crop_size.as_crop();
            center_crop(&resized, crop_height, crop_width)?
        } else {
            resized
        };

        let scale = if config.do_rescale {
            config.rescale_factor
        } else {
            1.0
        };
        let mut tensor = cropped.as_ndarray3().mapv(|v| f32::from(v) * scale);
        if config.do_normalize {
            for (channel, mut plane) in tensor.axis_iter_mut(Axis(0)).enumerate() {
                let (mean, std) = (config.image_mean[channel], config.image_std[channel]);
                plane.mapv_inplace(|v| (v - mean) / std);
            }
        }

        debug!(
            "Encoder preprocessing {}x{} -> {}x{}",
            width,
            height,
            cropped.width(),
            cropped.height()
        );
        Ok(ClipTensor(tensor))
    }

    fn resolution(&self) -> (u32, u32) {
        self.config.output_resolution()
    }
}

/// Crops the centered `crop_width`x`crop_height` window, zero-padding around the image
/// first when it is smaller than the window.
fn center_crop(image: &RgbImage, crop_height: u32, crop_width: u32) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let padded;
    let source = if width < crop_width || height < crop_height {
        padded = pad_centered(
            image,
            width.max(crop_width),
            height.max(crop_height),
            Rgb([0, 0, 0]),
        )
        .ok_or_else(|| ReasonSegError::validation("center crop", "padding canvas too small"))?;
        &padded
    } else {
        image
    };

    let (width, height) = source.dimensions();
    let left = (width - crop_width) / 2;
    let top = (height - crop_height) / 2;
    Ok(imageops::crop_imm(source, left, top, crop_width, crop_height).to_image())
}
