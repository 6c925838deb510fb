use std::path::Path;

use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    errors::{ReasonSegError, Result},
    inference::{EvaluateRequest, Evaluation, PredictedMask},
    traits::ReasoningSegmentationModel,
};

const SAM_INPUT: &str = "images";
const OUTPUT_IDS: &str = "output_ids";
const PRED_MASKS: &str = "pred_masks";

/// Reasoning segmentation model exported to ONNX and run through ONNX Runtime.
///
/// Inputs: `images_clip` `(1, 3, H, W)`, `images` `(1, 3, T, T)`, `input_ids` `(1, L)`,
/// `resize` `(2,)`, `original_size` `(2,)`, `max_new_tokens` `(1,)`.
/// Outputs: `pred_masks` `(N, h, w)` and optionally `output_ids` `(1, L')`.
pub struct Model {
    canvas_size: Option<u32>,
    has_output_ids: bool,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| ReasonSegError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| ReasonSegError::Model {
                operation: "execution provider registration".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| ReasonSegError::Model {
                operation: "memory pattern configuration".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| ReasonSegError::Model {
                operation: format!("load model file: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let canvas_size = session
            .inputs
            .iter()
            .find(|input| input.name == SAM_INPUT)
            .and_then(|input| input.input_type.tensor_shape())
            .and_then(|shape| shape.get(2).copied())
            .filter(|&dim| dim > 0)
            .map(|dim| dim as u32);
        let has_output_ids = session.outputs.iter().any(|output| output.name == OUTPUT_IDS);

        info!(
            "Loaded model {} (canvas {:?}, output ids: {})",
            model_path.display(),
            canvas_size,
            has_output_ids
        );

        Ok(Self {
            canvas_size,
            has_output_ids,
            session: Mutex::new(session),
        })
    }

    /// Static canvas size declared by the model's segmentation input, if any.
    pub const fn canvas_size(&self) -> Option<u32> {
        self.canvas_size
    }
}

impl ReasoningSegmentationModel for Model {
    fn evaluate(&self, request: &EvaluateRequest<'_>) -> Result<Evaluation> {
        let geometry = request.geometry;
        let images_clip = request.clip.to_batched();
        let images = request.sam.to_batched();
        let ids = request.input_ids.as_slice();
        let input_ids = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let (resized_height, resized_width) = geometry.resized_size();
        let (original_height, original_width) = geometry.original_size();
        let resize = arr1(&[i64::from(resized_height), i64::from(resized_width)]);
        let original_size = arr1(&[i64::from(original_height), i64::from(original_width)]);
        let max_new_tokens = arr1(&[request.max_new_tokens as i64]);

        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            "images_clip" => TensorRef::from_array_view(&images_clip)?,
            SAM_INPUT => TensorRef::from_array_view(&images)?,
            "input_ids" => TensorRef::from_array_view(&input_ids)?,
            "resize" => TensorRef::from_array_view(&resize)?,
            "original_size" => TensorRef::from_array_view(&original_size)?,
            "max_new_tokens" => TensorRef::from_array_view(&max_new_tokens)?,
        ])?;

        let masks = outputs[PRED_MASKS]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()?
            .outer_iter()
            .map(|scores| PredictedMask::new(scores.to_owned()))
            .collect::<Vec<_>>();

        let output_ids = if self.has_output_ids {
            outputs[OUTPUT_IDS]
                .try_extract_array::<i64>()?
                .iter()
                .copied()
                .collect()
        } else {
            Vec::new()
        };

        debug!("Model returned {} masks", masks.len());
        Ok(Evaluation { output_ids, masks })
    }
}
