use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::reference::LocalModel;

// Shape of the manifest.json an AutoML Vision Edge export ships with.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalModelManifest {
    pub model_file: String,
    pub labels_file: String,
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

fn default_model_type() -> String {
    "IMAGE_LABELING".into()
}

#[derive(Debug, Clone)]
pub struct ResolvedLocalModel {
    pub model_file: PathBuf,
    pub labels_file: PathBuf,
}

pub fn load_local_manifest(assets_dir: &Path, model: &LocalModel) -> Result<ResolvedLocalModel> {
    let manifest_path = assets_dir.join(model.manifest_path());
    let bytes = fs::read(&manifest_path)
        .with_context(|| format!("read local model manifest {}", manifest_path.display()))?;
    let manifest: LocalModelManifest =
        serde_json::from_slice(&bytes).context("parse local model manifest")?;
    if manifest.model_type != "IMAGE_LABELING" {
        return Err(anyhow!(
            "unsupported local model type {:?}",
            manifest.model_type
        ));
    }

    let base = manifest_path.parent().unwrap_or(assets_dir);
    Ok(ResolvedLocalModel {
        model_file: base.join(&manifest.model_file),
        labels_file: base.join(&manifest.labels_file),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reference::LOCAL_MODEL_PATH;

    #[test]
    fn resolves_files_next_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events");
        fs::create_dir_all(&events).unwrap();
        fs::write(
            events.join("manifest.json"),
            r#"{"modelFile":"model.tflite","labelsFile":"dict.txt","modelType":"IMAGE_LABELING"}"#,
        )
        .unwrap();

        let resolved =
            load_local_manifest(dir.path(), &LocalModel::new(LOCAL_MODEL_PATH)).unwrap();
        assert_eq!(resolved.model_file, events.join("model.tflite"));
        assert_eq!(resolved.labels_file, events.join("dict.txt"));
    }

    #[test]
    fn rejects_other_model_types() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"modelFile":"m.tflite","labelsFile":"d.txt","modelType":"OBJECT_DETECTION"}"#,
        )
        .unwrap();
        let result = load_local_manifest(dir.path(), &LocalModel::new("manifest.json"));
        assert!(result.is_err());
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_local_manifest(dir.path(), &LocalModel::new(LOCAL_MODEL_PATH)).is_err());
    }
}
