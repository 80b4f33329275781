use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::download::{download_and_extract, plan_for};
use super::manager::{ModelManager, ModelSource, ModelStatus};
use super::reference::RemoteModel;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadConditions {
    pub require_wifi: bool,
    pub require_charging: bool,
}

impl DownloadConditions {
    pub fn is_unconditional(&self) -> bool {
        !self.require_wifi && !self.require_charging
    }
}

/// Fetches and caches remote labeling models. `download` blocks until the
/// model is installed or the attempt failed; callers run it off their own
/// thread.
pub trait ModelProvisioning: Send + Sync {
    fn download(
        &self,
        model: &RemoteModel,
        conditions: &DownloadConditions,
        progress: &mut dyn FnMut(f32),
    ) -> Result<()>;

    fn is_model_downloaded(&self, model: &RemoteModel) -> Result<bool>;
}

pub struct HttpProvisioner {
    manager: Arc<Mutex<ModelManager>>,
}

impl HttpProvisioner {
    pub fn new(manager: Arc<Mutex<ModelManager>>) -> Self {
        Self { manager }
    }

    pub fn register_source(&self, model: &RemoteModel, source: Option<ModelSource>) -> Result<()> {
        self.manager.lock().register(model, source)
    }

    fn record_status(&self, model: &RemoteModel, status: ModelStatus) {
        let mut guard = self.manager.lock();
        guard.set_status(model.name(), status);
        if let Err(error) = guard.save() {
            warn!("Failed to persist model manifest: {error:?}");
        }
    }
}

impl ModelProvisioning for HttpProvisioner {
    fn download(
        &self,
        model: &RemoteModel,
        conditions: &DownloadConditions,
        progress: &mut dyn FnMut(f32),
    ) -> Result<()> {
        if !conditions.is_unconditional() {
            debug!(
                model = model.name(),
                ?conditions,
                "download conditions are not enforced on this platform"
            );
        }

        let plan = {
            let guard = self.manager.lock();
            if guard.is_installed(model) {
                return Ok(());
            }
            let record = guard
                .record(model.name())
                .ok_or_else(|| anyhow!("model {} is not registered", model.name()))?;
            plan_for(record, guard.root())
        };
        let Some(plan) = plan else {
            self.record_status(model, ModelStatus::Error("missing download source".into()));
            return Err(anyhow!("no download source for model {}", model.name()));
        };

        self.record_status(model, ModelStatus::Downloading { progress: 0.0 });
        let expected = plan.expected_size_bytes;
        let result = download_and_extract(&plan, |downloaded| {
            progress(progress_fraction(downloaded, expected));
        });

        match result {
            Ok(outcome) => {
                let mut guard = self.manager.lock();
                if let Some(record) = guard.record_mut(model.name()) {
                    record.size_bytes = outcome.archive_size_bytes;
                    if record.checksum.is_none() {
                        record.checksum = Some(outcome.checksum.clone());
                    }
                    record.status = ModelStatus::Installed;
                    record.installed_at = Some(OffsetDateTime::now_utc());
                }
                guard.save()
            }
            Err(error) => {
                self.record_status(model, ModelStatus::Error(error.to_string()));
                Err(error)
            }
        }
    }

    fn is_model_downloaded(&self, model: &RemoteModel) -> Result<bool> {
        Ok(self.manager.lock().is_installed(model))
    }
}

fn progress_fraction(downloaded: u64, expected: Option<u64>) -> f32 {
    match expected {
        Some(total) if total > 0 => (downloaded as f64 / total as f64).clamp(0.0, 1.0) as f32,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::models::manager::install_dir;

    fn provisioner(dir: &std::path::Path) -> (HttpProvisioner, Arc<Mutex<ModelManager>>) {
        let manager = Arc::new(Mutex::new(
            ModelManager::with_root(dir.to_path_buf()).unwrap(),
        ));
        (HttpProvisioner::new(manager.clone()), manager)
    }

    #[test]
    fn missing_source_marks_error() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, manager) = provisioner(dir.path());
        let model = RemoteModel::new("event_demo_dataset").unwrap();
        provisioner.register_source(&model, None).unwrap();

        let result = provisioner.download(&model, &DownloadConditions::default(), &mut |_| {});
        assert!(result.is_err());
        assert_eq!(
            manager.lock().record("event_demo_dataset").unwrap().status,
            ModelStatus::Error("missing download source".into())
        );
        assert!(!provisioner.is_model_downloaded(&model).unwrap());
    }

    #[test]
    fn installed_model_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, manager) = provisioner(dir.path());
        let model = RemoteModel::new("event_demo_dataset").unwrap();
        provisioner.register_source(&model, None).unwrap();
        {
            let mut guard = manager.lock();
            guard.set_status(model.name(), ModelStatus::Installed);
            fs::create_dir_all(install_dir(guard.root(), model.name())).unwrap();
        }

        assert!(provisioner.is_model_downloaded(&model).unwrap());
        provisioner
            .download(&model, &DownloadConditions::default(), &mut |_| {})
            .unwrap();
    }

    #[test]
    fn unregistered_model_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, _) = provisioner(dir.path());
        let model = RemoteModel::new("unknown").unwrap();
        assert!(!provisioner.is_model_downloaded(&model).unwrap());
        assert!(provisioner
            .download(&model, &DownloadConditions::default(), &mut |_| {})
            .is_err());
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_fraction(50, Some(100)), 0.5);
        assert_eq!(progress_fraction(150, Some(100)), 1.0);
        assert_eq!(progress_fraction(10, None), 0.0);
    }
}
