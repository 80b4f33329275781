use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::reference::RemoteModel;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ModelStatus {
    NotInstalled,
    Downloading { progress: f32 },
    Installed,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModelRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    pub status: ModelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ModelSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<OffsetDateTime>,
}

impl RemoteModelRecord {
    pub fn new(name: impl Into<String>, source: Option<ModelSource>) -> Self {
        Self {
            name: name.into(),
            checksum: None,
            size_bytes: 0,
            status: ModelStatus::NotInstalled,
            source,
            installed_at: None,
        }
    }

    #[must_use]
    pub fn path(&self, base_dir: &Path) -> PathBuf {
        install_dir(base_dir, &self.name)
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.status, ModelStatus::Installed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSource {
    pub uri: String,
    pub archive_format: ArchiveFormat,
    #[serde(default)]
    pub strip_prefix_components: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
    TarBz2,
    File,
}

#[must_use]
pub fn install_dir(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join("remote").join(name)
}

#[derive(Debug)]
pub struct ModelManager {
    root: PathBuf,
    manifest: PathBuf,
    records: Vec<RemoteModelRecord>,
}

impl ModelManager {
    pub fn new() -> Result<Self> {
        Self::with_root(resolve_model_dir()?)
    }

    pub fn with_root(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).context("create models dir")?;
        let manifest = root.join(MANIFEST_FILE);
        let mut manager = Self {
            root,
            manifest,
            records: vec![],
        };
        manager.load_manifest()?;
        manager.recover_interrupted();
        Ok(manager)
    }

    /// Adds the record for `model` if missing and refreshes its download
    /// source. An installed model keeps its status.
    pub fn register(&mut self, model: &RemoteModel, source: Option<ModelSource>) -> Result<()> {
        match self.record_mut(model.name()) {
            Some(existing) => existing.source = source,
            None => self.records.push(RemoteModelRecord::new(model.name(), source)),
        }
        self.save()
    }

    pub fn record(&self, name: &str) -> Option<&RemoteModelRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut RemoteModelRecord> {
        self.records.iter_mut().find(|record| record.name == name)
    }

    pub fn is_installed(&self, model: &RemoteModel) -> bool {
        self.record(model.name())
            .map(|record| record.is_installed() && record.path(&self.root).exists())
            .unwrap_or(false)
    }

    pub fn set_status(&mut self, name: &str, status: ModelStatus) -> Option<RemoteModelRecord> {
        let record = self.record_mut(name)?;
        record.status = status;
        Some(record.clone())
    }

    pub fn save(&self) -> Result<()> {
        let manifest = File::create(&self.manifest).context("create model manifest")?;
        serde_json::to_writer_pretty(manifest, &self.records).context("write model manifest")?;
        Ok(())
    }

    pub fn uninstall(&mut self, model: &RemoteModel) -> Result<Option<RemoteModelRecord>> {
        let root = self.root.clone();
        let Some(record) = self.record_mut(model.name()) else {
            return Ok(None);
        };
        let path = record.path(&root);
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("remove model directory {}", path.display()))?;
        }
        record.checksum = None;
        record.size_bytes = 0;
        record.status = ModelStatus::NotInstalled;
        record.installed_at = None;
        let snapshot = record.clone();
        self.save()?;
        Ok(Some(snapshot))
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    fn load_manifest(&mut self) -> Result<()> {
        if self.manifest.exists() {
            let manifest = File::open(&self.manifest).context("open model manifest")?;
            let records: Vec<RemoteModelRecord> =
                serde_json::from_reader(manifest).context("parse model manifest")?;
            self.records = records;
        }
        Ok(())
    }

    // A previous process may have died mid-download.
    fn recover_interrupted(&mut self) {
        for record in self.records.iter_mut() {
            if matches!(record.status, ModelStatus::Downloading { .. }) {
                record.status = ModelStatus::NotInstalled;
            }
        }
    }
}

fn resolve_model_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "WtmEvent", "AutoMlLabeler")
        .context("missing project directories")?;
    Ok(project_dirs.data_dir().join("models"))
}
