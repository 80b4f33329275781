use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DATA_MODEL: &str = "event_demo_dataset";
pub const LOCAL_MODEL_PATH: &str = "events/manifest.json";

// Dataset names accepted by the AutoML console.
static REMOTE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,32}$").expect("remote model name pattern"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModel {
    name: String,
}

impl RemoteModel {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !REMOTE_NAME_RE.is_match(&name) {
            return Err(anyhow!("invalid remote model name {name:?}"));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LocalModel {
    manifest_path: PathBuf,
}

impl LocalModel {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelReference {
    Remote(RemoteModel),
    Local(LocalModel),
}

impl ModelReference {
    pub fn is_remote(&self) -> bool {
        matches!(self, ModelReference::Remote(_))
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelReference::Remote(model) => write!(f, "remote:{}", model.name()),
            ModelReference::Local(model) => {
                write!(f, "local:{}", model.manifest_path().display())
            }
        }
    }
}

/// The two references an app instance can label with. Built once at start and
/// reused for every labeling request.
#[derive(Debug, Clone)]
pub struct ModelReferences {
    pub remote: RemoteModel,
    pub local: Option<LocalModel>,
}

impl ModelReferences {
    pub fn remote_reference(&self) -> ModelReference {
        ModelReference::Remote(self.remote.clone())
    }

    pub fn local_reference(&self) -> Option<ModelReference> {
        self.local.clone().map(ModelReference::Local)
    }
}
