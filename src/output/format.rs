use std::fmt::Write;

use crate::inference::ImageLabel;

pub const UNABLE_TO_DETECT: &str = "Unable to detect anything in the selected image";
pub const UNABLE_TO_LABEL: &str = "Unable to label the selected image";

/// What a single labeling completion renders: the label text or one alert,
/// never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOutcome {
    Labels(String),
    Alert(&'static str),
}

impl LabelOutcome {
    pub fn from_labels(labels: &[ImageLabel]) -> Self {
        let text = format_labels(labels);
        if text.trim().is_empty() {
            LabelOutcome::Alert(UNABLE_TO_DETECT)
        } else {
            LabelOutcome::Labels(text)
        }
    }

    pub fn failure() -> Self {
        LabelOutcome::Alert(UNABLE_TO_LABEL)
    }
}

pub fn format_labels(labels: &[ImageLabel]) -> String {
    let mut out = String::new();
    for label in labels {
        let _ = writeln!(out, "{}:{}", label.text, percentage(label.confidence));
    }
    out
}

// Truncates toward zero: 0.879 shows as 87 %.
pub fn percentage(confidence: f32) -> String {
    let scaled = (confidence * 100.0).clamp(0.0, 100.0) as u32;
    format!("{scaled} %")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str, confidence: f32) -> ImageLabel {
        ImageLabel {
            text: text.into(),
            confidence,
        }
    }

    #[test]
    fn formats_one_line_per_label_in_order() {
        let labels = [label("cat", 0.873), label("dog", 0.5)];
        assert_eq!(format_labels(&labels), "cat:87 %\ndog:50 %\n");
    }

    #[test]
    fn percentage_truncates_instead_of_rounding() {
        assert_eq!(percentage(0.879), "87 %");
        assert_eq!(percentage(0.999), "99 %");
        assert_eq!(percentage(1.0), "100 %");
        assert_eq!(percentage(0.0), "0 %");
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        assert_eq!(percentage(-0.2), "0 %");
        assert_eq!(percentage(1.7), "100 %");
    }

    #[test]
    fn repeated_labels_are_kept() {
        let labels = [label("cake", 0.9), label("cake", 0.6)];
        assert_eq!(format_labels(&labels), "cake:90 %\ncake:60 %\n");
    }

    #[test]
    fn empty_result_renders_only_the_alert() {
        assert_eq!(
            LabelOutcome::from_labels(&[]),
            LabelOutcome::Alert(UNABLE_TO_DETECT)
        );
        assert_eq!(
            LabelOutcome::from_labels(&[label("venue", 0.71)]),
            LabelOutcome::Labels("venue:71 %\n".into())
        );
    }
}
