use crate::errors::Result;
use crate::geometry::GeometryRecord;
use crate::inference::{EvaluateRequest, Evaluation, PredictedMask};
use crate::traits::ReasoningSegmentationModel;
use parking_lot::Mutex;

/// What the mock model answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum MockMask {
    /// No mask at all.
    Empty,
    /// Constant score over the resized (unpadded) region.
    PrePad(f32),
    /// Constant score over the whole padded canvas.
    Canvas(f32),
    /// The same fixed mask for every request.
    Fixed(PredictedMask),
}

/// Summary of one request seen by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedRequest {
    pub geometry: GeometryRecord,
    pub max_new_tokens: usize,
    pub prompt_len: usize,
    pub clip_resolution: (usize, usize),
    pub sam_canvas: usize,
}

/// Deterministic stand-in for the reasoning segmentation model.
#[derive(Debug)]
pub struct MockSegmentationModel {
    mask: MockMask,
    mask_count: usize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockSegmentationModel {
    pub fn new(mask: MockMask) -> Self {
        Self {
            mask,
            mask_count: 1,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(MockMask::Empty)
    }

    pub fn pre_pad(score: f32) -> Self {
        Self::new(MockMask::PrePad(score))
    }

    pub fn canvas(score: f32) -> Self {
        Self::new(MockMask::Canvas(score))
    }

    pub fn fixed(mask: PredictedMask) -> Self {
        Self::new(MockMask::Fixed(mask))
    }

    /// Repeats the mask `count` times in every answer.
    pub fn with_mask_count(mut self, count: usize) -> Self {
        self.mask_count = count;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn mask_for(&self, geometry: &GeometryRecord) -> Option<PredictedMask> {
        match &self.mask {
            MockMask::Empty => None,
            MockMask::PrePad(score) => {
                let (height, width) = geometry.resized_size();
                Some(PredictedMask::filled(height as usize, width as usize, *score))
            }
            MockMask::Canvas(score) => {
                let size = geometry.canvas_size() as usize;
                Some(PredictedMask::filled(size, size, *score))
            }
            MockMask::Fixed(mask) => Some(mask.clone()),
        }
    }
}

impl ReasoningSegmentationModel for MockSegmentationModel {
    fn evaluate(&self, request: &EvaluateRequest<'_>) -> Result<Evaluation> {
        self.requests.lock().push(RecordedRequest {
            geometry: request.geometry,
            max_new_tokens: request.max_new_tokens,
            prompt_len: request.input_ids.len(),
            clip_resolution: request.clip.resolution(),
            sam_canvas: request.sam.canvas_size(),
        });

        let masks = self
            .mask_for(&request.geometry)
            .map(|mask| vec![mask; self.mask_count])
            .unwrap_or_default();

        Ok(Evaluation {
            output_ids: request.input_ids.as_slice().to_vec(),
            masks,
        })
    }
}
