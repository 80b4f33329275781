mod command;
mod engine;

pub use command::CommandLabeling;
pub use engine::{
    retain_confident, ImageLabel, LabelInference, Labeler, LabelerOptions, CONFIDENCE_THRESHOLD,
};
