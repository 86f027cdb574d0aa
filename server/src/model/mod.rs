mod bundle;
mod onnx;

pub use bundle::{BundleError, BundleManifest, MANIFEST_FILE, ModelFamily, OutputSpec};
pub use onnx::OnnxScorer;

use ndarray::ArrayD;
use shared::{PredictionData, PredictionLabel};
use std::path::{Path, PathBuf};

use crate::preprocess::{PreprocessError, Preprocessor};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),
    #[error("Model not loaded: {0}")]
    Unavailable(String),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Model inference failed: {0}")]
    Session(#[from] ort::Error),
    #[error("Unexpected model output: {0}")]
    OutputShape(String),
}

/// Scoring seam: one implementation per concrete model family. The family
/// is picked at load time from the bundle manifest, never by runtime
/// introspection of the artifact.
pub trait Scorer: Send + Sync {
    fn score(&self, input: ArrayD<f32>) -> Result<Vec<f32>, InferenceError>;
}

struct LoadedModel {
    manifest: BundleManifest,
    preprocessor: Preprocessor,
    scorer: Box<dyn Scorer>,
}

enum ModelState {
    Ready(LoadedModel),
    /// Terminal state: the artifact could not be loaded at startup. Health
    /// keeps reporting it, every prediction fails fast, and a process
    /// restart is the only way back.
    Unavailable { reason: String },
}

pub struct Model {
    state: ModelState,
}

impl Model {
    /// Tries each candidate bundle directory in order; the first that loads
    /// wins. When none loads the service stays up degraded instead of
    /// exiting, so orchestration can observe the failure via /health.
    pub fn load(candidates: &[PathBuf]) -> Self {
        let mut failures = Vec::new();
        for dir in candidates {
            match Self::load_bundle(dir) {
                Ok(loaded) => {
                    log::info!(
                        "Loaded model bundle '{}' from {} ({} preprocessing)",
                        loaded.manifest.name,
                        dir.display(),
                        loaded.preprocessor.config().variant_name()
                    );
                    return Self {
                        state: ModelState::Ready(loaded),
                    };
                }
                Err(e) => {
                    log::warn!("Skipping bundle {}: {}", dir.display(), e);
                    failures.push(format!("{}: {}", dir.display(), e));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no model bundles configured".to_string()
        } else {
            failures.join("; ")
        };
        log::error!("No model could be loaded: {}", reason);
        Self {
            state: ModelState::Unavailable { reason },
        }
    }

    fn load_bundle(dir: &Path) -> Result<LoadedModel, InferenceError> {
        let (manifest, artifact) =
            BundleManifest::load(dir).map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        let preprocessor = Preprocessor::new(manifest.preprocessing.clone())
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        let scorer: Box<dyn Scorer> = match manifest.family {
            ModelFamily::Onnx => Box::new(OnnxScorer::load(&artifact)?),
        };

        Ok(LoadedModel {
            manifest,
            preprocessor,
            scorer,
        })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn model_type(&self) -> Option<String> {
        match &self.state {
            ModelState::Ready(loaded) => Some(loaded.manifest.name.clone()),
            ModelState::Unavailable { .. } => None,
        }
    }

    pub fn artifact_name(&self) -> Option<String> {
        match &self.state {
            ModelState::Ready(loaded) => Some(loaded.manifest.artifact.clone()),
            ModelState::Unavailable { .. } => None,
        }
    }

    pub fn enhanced_preprocessing(&self) -> bool {
        match &self.state {
            ModelState::Ready(loaded) => loaded.preprocessor.config().is_enhanced(),
            ModelState::Unavailable { .. } => false,
        }
    }

    /// Runs the paired preprocessing, scores the tensor and applies the
    /// 0.5 decision threshold. The reported confidence is the probability
    /// of the predicted class, so it is always at least 50%.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<PredictionData, InferenceError> {
        let loaded = match &self.state {
            ModelState::Ready(loaded) => loaded,
            ModelState::Unavailable { reason } => {
                return Err(InferenceError::Unavailable(reason.clone()));
            }
        };

        let tensor = loaded.preprocessor.run(image_bytes)?;
        let scores = loaded.scorer.score(tensor)?;
        let raw_score = loaded.manifest.output.stone_probability(&scores)?;

        let has_stone = raw_score > 0.5;
        let confidence = if has_stone { raw_score } else { 1.0 - raw_score };

        Ok(PredictionData {
            prediction: if has_stone {
                PredictionLabel::Stone
            } else {
                PredictionLabel::Normal
            },
            confidence: round_to(confidence * 100.0, 2),
            confidence_score: round_to(confidence, 4),
            raw_score,
            has_kidney_stone: has_stone,
            model_type: loaded.manifest.name.clone(),
            preprocessing: loaded.preprocessor.config().variant_name().to_string(),
        })
    }
}

fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
pub(crate) struct FixedScorer(pub Vec<f32>);

#[cfg(test)]
impl Scorer for FixedScorer {
    fn score(&self, _input: ArrayD<f32>) -> Result<Vec<f32>, InferenceError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
impl Model {
    pub(crate) fn ready_with(manifest: BundleManifest, scorer: Box<dyn Scorer>) -> Self {
        let preprocessor = Preprocessor::new(manifest.preprocessing.clone()).unwrap();
        Self {
            state: ModelState::Ready(LoadedModel {
                manifest,
                preprocessor,
                scorer,
            }),
        }
    }

    pub(crate) fn unavailable(reason: &str) -> Self {
        Self {
            state: ModelState::Unavailable {
                reason: reason.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessConfig;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn manifest(output: OutputSpec) -> BundleManifest {
        BundleManifest {
            name: "CNN (Original)".to_string(),
            family: ModelFamily::Onnx,
            artifact: "kidney_stone_cnn.onnx".to_string(),
            output,
            preprocessing: PreprocessConfig::basic(64, 3),
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([120])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn high_score_detects_stone() {
        let model = Model::ready_with(
            manifest(OutputSpec::Sigmoid),
            Box::new(FixedScorer(vec![0.82])),
        );
        let result = model.predict(&png_bytes()).unwrap();
        assert_eq!(result.prediction, PredictionLabel::Stone);
        assert!(result.has_kidney_stone);
        assert_eq!(result.raw_score, 0.82);
        assert_eq!(result.confidence, 82.0);
        assert_eq!(result.confidence_score, 0.82);
    }

    #[test]
    fn low_score_reports_normal_with_flipped_confidence() {
        let model = Model::ready_with(
            manifest(OutputSpec::Sigmoid),
            Box::new(FixedScorer(vec![0.2])),
        );
        let result = model.predict(&png_bytes()).unwrap();
        assert_eq!(result.prediction, PredictionLabel::Normal);
        assert!(!result.has_kidney_stone);
        assert_eq!(result.raw_score, 0.2);
        assert_eq!(result.confidence, 80.0);
    }

    #[test]
    fn boundary_score_counts_as_normal() {
        let model = Model::ready_with(
            manifest(OutputSpec::Sigmoid),
            Box::new(FixedScorer(vec![0.5])),
        );
        let result = model.predict(&png_bytes()).unwrap();
        assert_eq!(result.prediction, PredictionLabel::Normal);
        assert_eq!(result.confidence, 50.0);
    }

    #[test]
    fn confidence_is_always_at_least_fifty() {
        for raw in [0.0, 0.25, 0.5, 0.51, 0.75, 1.0] {
            let model = Model::ready_with(
                manifest(OutputSpec::Sigmoid),
                Box::new(FixedScorer(vec![raw])),
            );
            let result = model.predict(&png_bytes()).unwrap();
            assert!(
                (50.0..=100.0).contains(&result.confidence),
                "confidence {} out of range for raw score {}",
                result.confidence,
                raw
            );
        }
    }

    #[test]
    fn softmax_head_uses_positive_component() {
        let model = Model::ready_with(
            manifest(OutputSpec::Softmax { positive_index: 1 }),
            Box::new(FixedScorer(vec![0.1, 0.9])),
        );
        let result = model.predict(&png_bytes()).unwrap();
        assert_eq!(result.prediction, PredictionLabel::Stone);
        assert_eq!(result.raw_score, 0.9);
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        let model = Model::ready_with(
            manifest(OutputSpec::Sigmoid),
            Box::new(FixedScorer(vec![0.83333])),
        );
        let result = model.predict(&png_bytes()).unwrap();
        assert_eq!(result.confidence, 83.33);
        assert_eq!(result.confidence_score, 0.8333);
    }

    #[test]
    fn unavailable_model_fails_fast() {
        let model = Model::unavailable("artifact missing");
        let result = model.predict(&png_bytes());
        assert!(matches!(result, Err(InferenceError::Unavailable(_))));
    }

    #[test]
    fn load_with_no_candidates_is_degraded() {
        let model = Model::load(&[]);
        assert!(!model.is_loaded());
        assert_eq!(model.model_type(), None);
    }

    #[test]
    fn load_with_missing_bundles_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::load(&[dir.path().join("kidney_stone_hybrid")]);
        assert!(!model.is_loaded());
        assert!(!model.enhanced_preprocessing());
    }
}
