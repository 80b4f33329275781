use serde::{Deserialize, Serialize};

pub const GALLERY_REQUEST_CODE: u32 = 1000;
pub const IMAGE_MIME_FILTER: &str = "image/*";

pub const WAIT_FOR_MODEL: &str = "Please wait until the model downloads";
pub const MODEL_DOWNLOAD_FAILED: &str = "The model could not be downloaded, retry to continue";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PickerRequest {
    pub request_code: u32,
    pub mime_filter: &'static str,
}

impl Default for PickerRequest {
    fn default() -> Self {
        Self {
            request_code: GALLERY_REQUEST_CODE,
            mime_filter: IMAGE_MIME_FILTER,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    ModelDownloading,
    ModelDownloadFailed,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::ModelDownloading => WAIT_FOR_MODEL,
            DenyReason::ModelDownloadFailed => MODEL_DOWNLOAD_FAILED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectAction {
    LaunchPicker(PickerRequest),
    Denied(DenyReason),
}

/// One image handed back by the picker. The locator is opaque to this crate
/// and passed through to the labeler untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEvent {
    pub request_code: u32,
    pub locator: String,
}

impl SelectionEvent {
    pub fn from_gallery(locator: impl Into<String>) -> Self {
        Self {
            request_code: GALLERY_REQUEST_CODE,
            locator: locator.into(),
        }
    }

    pub fn is_gallery_result(&self) -> bool {
        self.request_code == GALLERY_REQUEST_CODE && !self.locator.trim().is_empty()
    }
}
