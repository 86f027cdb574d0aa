use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum PredictionLabel {
    #[serde(rename = "Stone Detected")]
    #[strum(serialize = "Stone Detected")]
    Stone,
    #[serde(rename = "Normal Kidney")]
    #[strum(serialize = "Normal Kidney")]
    Normal,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionData {
    pub prediction: PredictionLabel,
    pub confidence: f32,
    pub confidence_score: f32,
    pub raw_score: f32,
    pub has_kidney_stone: bool,
    pub model_type: String,
    pub preprocessing: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictResponse {
    pub success: bool,
    pub data: PredictionData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_type: Option<String>,
    pub enhanced_preprocessing: bool,
    pub service: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub model_type: Option<String>,
    pub enhanced_preprocessing: bool,
    pub model: Option<String>,
    pub endpoints: BTreeMap<String, String>,
}
