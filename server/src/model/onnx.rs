use ndarray::ArrayD;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::path::Path;

use crate::model::{InferenceError, Scorer};

/// ONNX Runtime scorer: one session per process, input and output names
/// discovered from the model graph at load time. `Session::run` needs
/// exclusive access, hence the mutex.
pub struct OnnxScorer {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxScorer {
    pub fn load(artifact: &Path) -> Result<Self, InferenceError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(artifact)?;

        if session.inputs.is_empty() || session.outputs.is_empty() {
            return Err(InferenceError::ModelLoad(format!(
                "model has no graph inputs or outputs: {}",
                artifact.display()
            )));
        }
        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();

        log::info!(
            "Loaded ONNX model {} (input '{}', output '{}')",
            artifact.display(),
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl Scorer for OnnxScorer {
    fn score(&self, input: ArrayD<f32>) -> Result<Vec<f32>, InferenceError> {
        let tensor = Tensor::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(inputs![self.input_name.as_str() => tensor])?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            InferenceError::OutputShape(format!("model output '{}' is missing", self.output_name))
        })?;
        let scores = output.try_extract_array::<f32>()?;

        Ok(scores.iter().copied().collect())
    }
}
