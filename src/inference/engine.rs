use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::ModelReference;

pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageLabel {
    pub text: String,
    pub confidence: f32,
}

/// A labeler configuration: one model, one threshold. The threshold is fixed
/// at construction and cannot be changed by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelerOptions {
    model: ModelReference,
    confidence_threshold: f32,
}

impl LabelerOptions {
    pub fn new(model: ModelReference) -> Self {
        Self {
            model,
            confidence_threshold: CONFIDENCE_THRESHOLD,
        }
    }

    pub fn model(&self) -> &ModelReference {
        &self.model
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }
}

pub trait Labeler: Send {
    fn process_image(&self, locator: &str) -> Result<Vec<ImageLabel>>;
}

pub trait LabelInference: Send + Sync {
    fn build_labeler(&self, options: &LabelerOptions) -> Result<Box<dyn Labeler>>;
}

pub fn retain_confident(labels: Vec<ImageLabel>, threshold: f32) -> Vec<ImageLabel> {
    labels
        .into_iter()
        .filter(|label| label.confidence >= threshold)
        .collect()
}
