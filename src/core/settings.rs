use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::availability::ResolutionPolicy;
use crate::models::{
    ArchiveFormat, DownloadConditions, LocalModel, ModelReferences, ModelSource, RemoteModel,
    RetryPolicy, DATA_MODEL, LOCAL_MODEL_PATH,
};

const CONFIG_FILE: &str = "config.json";
const ENV_MODEL_URI: &str = "LABELER_MODEL_URI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabelerSettings {
    pub remote_model_name: String,
    pub model_source_uri: Option<String>,
    pub archive_format: ArchiveFormat,
    pub strip_prefix_components: u8,
    pub local_manifest_path: Option<String>,
    pub assets_dir: Option<PathBuf>,
    pub resolution_policy: ResolutionPolicy,
    pub download_conditions: DownloadConditions,
    pub retry: RetrySettings,
}

impl Default for LabelerSettings {
    fn default() -> Self {
        Self {
            remote_model_name: DATA_MODEL.into(),
            model_source_uri: None,
            archive_format: ArchiveFormat::Zip,
            strip_prefix_components: 0,
            local_manifest_path: Some(LOCAL_MODEL_PATH.into()),
            assets_dir: None,
            resolution_policy: ResolutionPolicy::RemoteWithLocalFallback,
            download_conditions: DownloadConditions::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl LabelerSettings {
    pub fn model_references(&self) -> Result<ModelReferences> {
        let remote = RemoteModel::new(self.remote_model_name.clone())?;
        let local = match self.resolution_policy {
            ResolutionPolicy::RemoteOnly => None,
            ResolutionPolicy::RemoteWithLocalFallback => {
                self.local_manifest_path.clone().map(LocalModel::new)
            }
        };
        Ok(ModelReferences { remote, local })
    }

    pub fn model_source(&self) -> Option<ModelSource> {
        let uri = std::env::var(ENV_MODEL_URI)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.model_source_uri.clone())?;
        Some(ModelSource {
            uri,
            archive_format: self.archive_format,
            strip_prefix_components: self.strip_prefix_components,
        })
    }
}

pub struct SettingsManager {
    path: PathBuf,
    inner: RwLock<LabelerSettings>,
}

impl SettingsManager {
    pub fn new() -> Result<Self> {
        Self::with_path(resolve_config_path()?)
    }

    pub fn with_path(path: PathBuf) -> Result<Self> {
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn read(&self) -> LabelerSettings {
        self.inner.read().clone()
    }

    pub fn write(&self, settings: LabelerSettings) -> Result<()> {
        let mut guard = self.inner.write();
        persist_settings(&self.path, &settings)?;
        *guard = settings;
        Ok(())
    }
}

pub fn default_assets_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "WtmEvent", "AutoMlLabeler")
        .context("missing project directories")?;
    Ok(project_dirs.data_dir().join("assets"))
}

fn resolve_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "WtmEvent", "AutoMlLabeler")
        .context("missing project directories")?;
    let dir = project_dirs.config_dir();
    fs::create_dir_all(dir).context("creating config directory failed")?;
    Ok(dir.join(CONFIG_FILE))
}

fn load_settings(path: &Path) -> Result<LabelerSettings> {
    if !path.exists() {
        return Ok(LabelerSettings::default());
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).context("config json could not be parsed")
}

fn persist_settings(path: &Path, settings: &LabelerSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    let serialized =
        serde_json::to_vec_pretty(settings).context("serialize settings to json failed")?;
    fs::write(path, serialized).with_context(|| format!("write settings to {path:?}"))?;
    Ok(())
}
