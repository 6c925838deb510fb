use crate::clip::ClipTensor;
use crate::errors::Result;
use crate::inference::{EvaluateRequest, Evaluation};
use image::RgbImage;

/// External reasoning-segmentation model.
///
/// The pipeline depends on this abstraction rather than on a concrete runtime so that the
/// model (weights, device placement, tokenizer) stays the caller's concern and tests can
/// inject a deterministic stub.
pub trait ReasoningSegmentationModel: Send + Sync {
    /// Runs generation for one image and returns the generated ids plus every predicted
    /// mask, in model output resolution.
    fn evaluate(&self, request: &EvaluateRequest<'_>) -> Result<Evaluation>;
}

/// External fixed-size image encoder preprocessor.
pub trait EncoderPreprocessor: Send + Sync {
    fn preprocess(&self, image: &RgbImage) -> Result<ClipTensor>;

    /// (height, width) of every tensor produced by [`Self::preprocess`].
    fn resolution(&self) -> (u32, u32);
}

impl<T: ReasoningSegmentationModel + ?Sized> ReasoningSegmentationModel for &T {
    fn evaluate(&self, request: &EvaluateRequest<'_>) -> Result<Evaluation> {
        (**self).evaluate(request)
    }
}

impl<T: ReasoningSegmentationModel + ?Sized> ReasoningSegmentationModel for Box<T> {
    fn evaluate(&self, request: &EvaluateRequest<'_>) -> Result<Evaluation> {
        (**self).evaluate(request)
    }
}
