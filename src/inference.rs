use ndarray::prelude::*;
use tracing::debug;

use crate::clip::ClipTensor;
use crate::errors::{ReasonSegError, Result};
use crate::geometry::GeometryRecord;
use crate::normalize::SamTensor;
use crate::traits::ReasoningSegmentationModel;

/// Token id standing in for the image embedding inside a prompt.
pub const IMAGE_TOKEN_INDEX: i64 = -200;

/// Finished prompt token sequence.
///
/// Built by an external tokenizer/template step. The only thing checked here is that it
/// contains exactly one image placeholder, because every request carries one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTokens(Vec<i64>);

impl PromptTokens {
    pub fn new(ids: Vec<i64>) -> Result<Self> {
        let placeholders = ids.iter().filter(|&&id| id == IMAGE_TOKEN_INDEX).count();
        if placeholders != 1 {
            return Err(ReasonSegError::validation(
                "prompt tokens",
                format!(
                    "must contain exactly one image placeholder, found {}",
                    placeholders
                ),
            ));
        }
        Ok(Self(ids))
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw mask scores `(height, width)` in the model's output resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedMask(Array2<f32>);

impl PredictedMask {
    pub fn new(scores: Array2<f32>) -> Self {
        Self(scores)
    }

    /// Constant-score mask, mostly useful for stubs.
    pub fn filled(height: usize, width: usize, score: f32) -> Self {
        Self(Array2::from_elem((height, width), score))
    }

    pub fn scores(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }

    /// (height, width)
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let (height, width) = self.0.dim();
        match (u32::try_from(height), u32::try_from(width)) {
            (Ok(height), Ok(width)) => Ok((height, width)),
            _ => Err(ReasonSegError::validation(
                "predicted mask",
                format!("{}x{} exceeds the supported image size", height, width),
            )),
        }
    }
}

/// Everything the model needs for one image.
#[derive(Debug, Clone, Copy)]
pub struct EvaluateRequest<'a> {
    pub clip: &'a ClipTensor,
    pub sam: &'a SamTensor,
    pub input_ids: &'a PromptTokens,
    pub geometry: GeometryRecord,
    pub max_new_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub output_ids: Vec<i64>,
    pub masks: Vec<PredictedMask>,
}

/// Packages one image into a single model call and enforces the single-region contract.
pub struct InferenceAdapter<M: ReasoningSegmentationModel> {
    model: M,
    prompt: PromptTokens,
    max_new_tokens: usize,
}

impl<M: ReasoningSegmentationModel> InferenceAdapter<M> {
    pub const fn new(model: M, prompt: PromptTokens, max_new_tokens: usize) -> Self {
        Self {
            model,
            prompt,
            max_new_tokens,
        }
    }

    pub const fn model(&self) -> &M {
        &self.model
    }

    pub const fn prompt(&self) -> &PromptTokens {
        &self.prompt
    }

    /// Calls the model once and returns its mask, if any.
    ///
    /// More than one mask is a contract violation for a single-region prompt and fails
    /// with [`ReasonSegError::MultipleMask`].
    pub fn run(
        &self,
        clip: &ClipTensor,
        sam: &SamTensor,
        geometry: GeometryRecord,
    ) -> Result<Option<PredictedMask>> {
        let request = EvaluateRequest {
            clip,
            sam,
            input_ids: &self.prompt,
            geometry,
            max_new_tokens: self.max_new_tokens,
        };
        let Evaluation { output_ids, masks } = self.model.evaluate(&request)?;
        debug!(
            "Model generated {} tokens and {} masks",
            output_ids.len(),
            masks.len()
        );

        if masks.len() > 1 {
            return Err(ReasonSegError::MultipleMask { count: masks.len() });
        }
        Ok(masks.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipImageProcessor;
    use crate::geometry::ResizeLongestSide;
    use crate::mocks::MockSegmentationModel;
    use crate::normalize::SamNormalizer;
    use crate::traits::EncoderPreprocessor;
    use image::RgbImage;

    fn prompt() -> PromptTokens {
        PromptTokens::new(vec![1, 319, IMAGE_TOKEN_INDEX, 29871, 13]).unwrap()
    }

    fn encode(image: &RgbImage) -> Result<(ClipTensor, SamTensor, GeometryRecord)> {
        let (resized, geometry) = ResizeLongestSide::new(32).apply_image(image)?;
        let sam = SamNormalizer::new(32).encode(&resized)?;
        let clip = ClipImageProcessor::default().preprocess(image)?;
        Ok((clip, sam, geometry))
    }

    #[test]
    fn test_prompt_requires_single_placeholder() {
        assert!(PromptTokens::new(vec![1, 2, 3]).is_err());
        assert!(PromptTokens::new(vec![IMAGE_TOKEN_INDEX, 5, IMAGE_TOKEN_INDEX]).is_err());
        assert_eq!(prompt().len(), 5);
    }

    #[test]
    fn test_single_mask_passthrough() -> Result<()> {
        let (clip, sam, geometry) = encode(&RgbImage::new(40, 30))?;
        let model = MockSegmentationModel::pre_pad(1.0);
        let adapter = InferenceAdapter::new(&model, prompt(), 512);

        let mask = adapter.run(&clip, &sam, geometry)?;
        assert_eq!(mask.map(|m| m.dimensions().unwrap()), Some((24, 32)));
        assert_eq!(model.call_count(), 1);
        Ok(())
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_mask_larger_than_u32_is_rejected() {
        let mask = PredictedMask::new(Array2::zeros((u32::MAX as usize + 1, 0)));
        assert!(matches!(
            mask.dimensions(),
            Err(ReasonSegError::Validation { .. })
        ));
        assert_eq!(PredictedMask::filled(3, 5, 0.0).dimensions().unwrap(), (3, 5));
    }

    #[test]
    fn test_no_mask_is_not_an_error() -> Result<()> {
        let (clip, sam, geometry) = encode(&RgbImage::new(10, 10))?;
        let adapter = InferenceAdapter::new(MockSegmentationModel::empty(), prompt(), 512);
        assert!(adapter.run(&clip, &sam, geometry)?.is_none());
        Ok(())
    }

    #[test]
    fn test_multiple_masks_fail_fast() -> Result<()> {
        let (clip, sam, geometry) = encode(&RgbImage::new(10, 10))?;
        let model = MockSegmentationModel::pre_pad(1.0).with_mask_count(2);
        let adapter = InferenceAdapter::new(&model, prompt(), 512);

        let result = adapter.run(&clip, &sam, geometry);
        assert!(matches!(result, Err(ReasonSegError::MultipleMask { count: 2 })));
        Ok(())
    }

    #[test]
    fn test_request_carries_geometry_and_limits() -> Result<()> {
        let (clip, sam, geometry) = encode(&RgbImage::new(40, 30))?;
        let model = MockSegmentationModel::empty();
        let adapter = InferenceAdapter::new(&model, prompt(), 64);
        adapter.run(&clip, &sam, geometry)?;

        let seen = model.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].geometry, geometry);
        assert_eq!(seen[0].max_new_tokens, 64);
        assert_eq!(seen[0].prompt_len, 5);
        Ok(())
    }
}
