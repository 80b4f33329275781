use thiserror::Error;

use crate::core::selection::DenyReason;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("download of model {model} failed: {reason}")]
    DownloadFailed { model: String, reason: String },
    #[error("no image was selected")]
    NoSelection,
    #[error("image selection refused: {}", .0.message())]
    SelectionDenied(DenyReason),
    #[error("labeling failed: {0}")]
    InferenceFailed(String),
}
