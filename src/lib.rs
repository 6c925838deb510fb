pub mod clip;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod geometry;
pub mod imageops_ext;
pub mod inference;
pub mod model;
pub mod normalize;
pub mod projector;
pub mod traits;

pub mod mocks;

use image::{EncodableLayout, ImageBuffer, ImageFormat, PixelWithColorType, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub use clip::{ClipImageProcessor, ClipPreprocessorConfig, ClipTensor};
pub use config::Config;
pub use dataset::{LocalDataset, PreparedImage, Preprocessor};
pub use errors::{ReasonSegError, Result};
pub use geometry::{GeometryRecord, ResizeLongestSide};
pub use inference::{InferenceAdapter, PredictedMask, PromptTokens};
pub use model::Model;
pub use normalize::{SamNormalizer, SamTensor};
pub use projector::{Compositor, FinalMask, MaskLayout, MaskProjector};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

const IMAGES_DIR: &str = "images";
const MASKS_DIR: &str = "masks";
const VIS_DIR: &str = "vis";

/// The three artifacts produced for one image.
#[derive(Debug, Clone)]
pub struct SegmentationOutput {
    pub image: RgbImage,
    pub mask: FinalMask,
    pub visualization: RgbImage,
    pub geometry: GeometryRecord,
}

/// Outcome of a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Image names written, in processing order.
    pub processed: Vec<String>,
    /// Inputs that were skipped, in processing order.
    pub failed: Vec<PathBuf>,
}

/// Runs the segmentation pipeline over a directory, one image at a time.
pub struct ImageProcessor<M: ReasoningSegmentationModel, E: EncoderPreprocessor = ClipImageProcessor> {
    preprocessor: Preprocessor<E>,
    adapter: InferenceAdapter<M>,
    projector: MaskProjector,
    compositor: Compositor,
    config: Config,
}

impl<M: ReasoningSegmentationModel, E: EncoderPreprocessor> ImageProcessor<M, E> {
    pub fn new(model: M, encoder: E, prompt: PromptTokens, config: Config) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.image_size, encoder),
            adapter: InferenceAdapter::new(model, prompt, config.max_new_tokens),
            projector: MaskProjector::new(config.mask_layout),
            compositor: Compositor::default(),
            config,
        }
    }

    pub const fn model(&self) -> &M {
        self.adapter.model()
    }

    pub fn process_directory(&self) -> Result<ProcessingSummary> {
        self.config.validate()?;
        let output_dir = &self.config.output_dir;

        let dataset = LocalDataset::open(&self.config.input_dir, &self.preprocessor)?;
        let mut summary = ProcessingSummary::default();
        if dataset.is_empty() {
            warn!("No images found in {}", self.config.input_dir.display());
            return Ok(summary);
        }

        for dir in [IMAGES_DIR, MASKS_DIR, VIS_DIR] {
            let path = output_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| ReasonSegError::FileSystem {
                path: path.clone(),
                operation: "create output directory".to_string(),
                source: e,
            })?;
        }

        let pb = ProgressBar::new(dataset.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| ReasonSegError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );

        for batch in dataset.batches(self.config.batch_size) {
            for (path, prepared) in batch {
                let result = prepared.and_then(|prepared| {
                    let name = prepared.name.clone();
                    let output = self.segment_prepared(prepared)?;
                    self.write_artifacts(&name, &output, output_dir)?;
                    Ok(name)
                });
                pb.inc(1);

                match result {
                    Ok(name) => summary.processed.push(name),
                    Err(e) if self.config.fail_fast => {
                        pb.abandon();
                        return Err(e);
                    }
                    Err(e) if e.is_contract_violation() => {
                        pb.suspend(|| warn!("Skipping {}: {}", path.display(), e));
                        summary.failed.push(path);
                    }
                    Err(e) => {
                        pb.suspend(|| error!("Failed to process {}: {}", path.display(), e));
                        summary.failed.push(path);
                    }
                }
            }
        }

        pb.finish_with_message("done");
        info!(
            "Processed {} images, skipped {}",
            summary.processed.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Runs both preprocessing paths, the model and the projection on an in-memory image.
    /// No files are touched.
    pub fn segment_image(&self, image: RgbImage) -> Result<SegmentationOutput> {
        let encoded = self.preprocessor.encode(&image)?;
        self.segment_encoded(image, encoded)
    }

    /// Processes one file and writes its artifacts below `output_dir`.
    pub fn process_single_image(&self, input_file: &Path, output_dir: &Path) -> Result<()> {
        let name = dataset::image_name(input_file)?;
        let image = dataset::read_image(input_file)?;
        let output = self.segment_image(image)?;
        self.write_artifacts(&name, &output, output_dir)
    }

    fn segment_prepared(&self, prepared: PreparedImage) -> Result<SegmentationOutput> {
        self.segment_encoded(prepared.image, prepared.encoded)
    }

    fn segment_encoded(
        &self,
        image: RgbImage,
        encoded: dataset::EncodedImage,
    ) -> Result<SegmentationOutput> {
        let geometry = encoded.geometry;
        let predicted = self.adapter.run(&encoded.clip, &encoded.sam, geometry)?;
        let mask = self.projector.project(predicted.as_ref(), &geometry)?;
        let visualization = self.compositor.composite(&image, &mask)?;
        Ok(SegmentationOutput {
            image,
            mask,
            visualization,
            geometry,
        })
    }

    /// Everything is computed before this point, so a failing image never leaves partial
    /// artifacts behind.
    fn write_artifacts(
        &self,
        name: &str,
        output: &SegmentationOutput,
        output_dir: &Path,
    ) -> Result<()> {
        let file_name = format!("{}.png", name);
        save_png(&output.image, &output_dir.join(IMAGES_DIR).join(&file_name))?;
        save_png(output.mask.as_image(), &output_dir.join(MASKS_DIR).join(&file_name))?;
        save_png(&output.visualization, &output_dir.join(VIS_DIR).join(&file_name))?;
        info!("Saved artifacts for {}", name);
        Ok(())
    }
}

fn save_png<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, path: &Path) -> Result<()>
where
    P: PixelWithColorType,
    [P::Subpixel]: EncodableLayout,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ReasonSegError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| ReasonSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save image".to_string(),
            source: Box::new(e),
        })
}

impl ImageProcessor<Model> {
    /// Builds a processor around the ONNX model and the encoder configuration named in
    /// `config`.
    pub fn with_onnx_model(config: Config) -> Result<Self> {
        config.validate()?;
        let model = Model::new(&config.model_path, config.device_id)?;
        if let Some(canvas) = model.canvas_size() {
            if canvas != config.image_size {
                return Err(ReasonSegError::Configuration {
                    message: format!(
                        "model expects a {} canvas but image_size is {}",
                        canvas, config.image_size
                    ),
                });
            }
        }

        let encoder_config = match &config.clip_config {
            Some(path) => ClipPreprocessorConfig::from_json_file(path)?,
            None => ClipPreprocessorConfig::default(),
        };
        let encoder = ClipImageProcessor::new(encoder_config)?;
        let prompt = crate::config::load_prompt_tokens(&config.input_ids)?;
        Ok(Self::new(model, encoder, prompt, config))
    }
}
