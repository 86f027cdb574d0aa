use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::InferenceError;
use crate::preprocess::PreprocessConfig;

pub const MANIFEST_FILE: &str = "bundle.yaml";

/// Sidecar metadata stored next to a model artifact. The manifest binds the
/// artifact to the preprocessing it was trained with, so the pairing is
/// deployed as one unit instead of being guessed at serving time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Display name reported by the service, e.g. "Hybrid VGG16+XGBoost".
    pub name: String,
    pub family: ModelFamily,
    /// Artifact file name, relative to the bundle directory.
    pub artifact: String,
    pub output: OutputSpec,
    pub preprocessing: PreprocessConfig,
}

/// Concrete loader family for the artifact, selected at load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Onnx,
}

/// Shape of the model's score output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "head", rename_all = "lowercase")]
pub enum OutputSpec {
    /// Single sigmoid unit; the scalar is the stone probability.
    Sigmoid,
    /// Probability vector; the stone probability sits at `positive_index`.
    Softmax { positive_index: usize },
}

impl OutputSpec {
    pub fn stone_probability(&self, scores: &[f32]) -> Result<f32, InferenceError> {
        match self {
            OutputSpec::Sigmoid => scores.first().copied().ok_or_else(|| {
                InferenceError::OutputShape("model returned an empty score vector".to_string())
            }),
            OutputSpec::Softmax { positive_index } => {
                scores.get(*positive_index).copied().ok_or_else(|| {
                    InferenceError::OutputShape(format!(
                        "score vector has {} entries, positive class is {}",
                        scores.len(),
                        positive_index
                    ))
                })
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Bundle manifest not found: {0}")]
    ManifestMissing(PathBuf),
    #[error("Failed to read bundle manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed bundle manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Model artifact not found: {0}")]
    ArtifactMissing(PathBuf),
}

impl BundleManifest {
    /// Reads `bundle.yaml` from a bundle directory and resolves the artifact
    /// path it names.
    pub fn load(dir: &Path) -> Result<(Self, PathBuf), BundleError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(BundleError::ManifestMissing(manifest_path));
        }

        let raw = std::fs::read_to_string(&manifest_path)?;
        let manifest: BundleManifest = serde_yaml::from_str(&raw)?;

        let artifact_path = dir.join(&manifest.artifact);
        if !artifact_path.exists() {
            return Err(BundleError::ArtifactMissing(artifact_path));
        }

        Ok((manifest, artifact_path))
    }
}
