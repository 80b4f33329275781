mod format;

pub use format::{format_labels, percentage, LabelOutcome, UNABLE_TO_DETECT, UNABLE_TO_LABEL};
