use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::events::{self, EventSink};
use crate::core::selection::DenyReason;
use crate::models::{
    DownloadConditions, ModelDownloadJob, ModelDownloadService, ModelProvisioning,
    ModelReference, ModelReferences, RetryPolicy,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    NotReady,
    Ready,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    /// Check the provisioning service again when an image arrives and fall back
    /// to the bundled model if the remote one is not on disk.
    RemoteWithLocalFallback,
    /// Trust the readiness gate and always label with the remote model.
    RemoteOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    InFlight { attempt: u32 },
    Completed,
    Failed { error: String },
}

pub struct AvailabilityCoordinator {
    state: watch::Sender<Availability>,
    phase: watch::Sender<DownloadPhase>,
    references: ModelReferences,
    policy: ResolutionPolicy,
    conditions: DownloadConditions,
    retry: RetryPolicy,
    provisioning: Arc<dyn ModelProvisioning>,
    sink: Arc<dyn EventSink>,
    downloads: Mutex<Option<ModelDownloadService>>,
}

impl AvailabilityCoordinator {
    pub fn new(
        references: ModelReferences,
        policy: ResolutionPolicy,
        conditions: DownloadConditions,
        retry: RetryPolicy,
        provisioning: Arc<dyn ModelProvisioning>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(Availability::NotReady);
        let (phase, _) = watch::channel(DownloadPhase::Idle);
        Arc::new(Self {
            state,
            phase,
            references,
            policy,
            conditions,
            retry,
            provisioning,
            sink,
            downloads: Mutex::new(None),
        })
    }

    pub fn availability(&self) -> Availability {
        *self.state.borrow()
    }

    pub fn can_initiate_selection(&self) -> bool {
        self.availability() == Availability::Ready
    }

    pub fn selection_gate(&self) -> Result<(), DenyReason> {
        if self.can_initiate_selection() {
            return Ok(());
        }
        match *self.phase.borrow() {
            DownloadPhase::Failed { .. } => Err(DenyReason::ModelDownloadFailed),
            _ => Err(DenyReason::ModelDownloading),
        }
    }

    pub fn phase(&self) -> DownloadPhase {
        self.phase.borrow().clone()
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    pub fn references(&self) -> &ModelReferences {
        &self.references
    }

    pub fn subscribe(&self) -> watch::Receiver<Availability> {
        self.state.subscribe()
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut receiver = self.subscribe();
        let ready = receiver.wait_for(|state| *state == Availability::Ready);
        let outcome = tokio::time::timeout(timeout, ready).await;
        matches!(outcome, Ok(Ok(_)))
    }

    /// Waits until the download either made the model ready or gave up after
    /// its last attempt, and reports the availability at that point.
    pub async fn wait_until_settled(&self, timeout: Duration) -> Availability {
        let mut receiver = self.phase.subscribe();
        let settled = receiver.wait_for(|phase| {
            matches!(phase, DownloadPhase::Completed | DownloadPhase::Failed { .. })
        });
        if tokio::time::timeout(timeout, settled).await.is_err() {
            debug!(?timeout, "model download still running");
        }
        self.availability()
    }

    /// Queues a background download of the remote model. Returns `false` when
    /// the model is already ready or a download is in flight.
    pub fn request_download(self: &Arc<Self>) -> Result<bool> {
        if self.can_initiate_selection() {
            return Ok(false);
        }
        let started = self.phase.send_if_modified(|phase| {
            if matches!(phase, DownloadPhase::InFlight { .. }) {
                return false;
            }
            *phase = DownloadPhase::InFlight { attempt: 0 };
            true
        });
        if !started {
            return Ok(false);
        }

        let queued = self.ensure_download_service().and_then(|service| {
            service.queue(ModelDownloadJob {
                model: self.references.remote.clone(),
                conditions: self.conditions,
            })
        });
        if let Err(error) = queued {
            self.phase.send_replace(DownloadPhase::Idle);
            return Err(error);
        }
        info!(model = self.references.remote.name(), "model download requested");
        Ok(true)
    }

    pub fn retry_download(self: &Arc<Self>) -> Result<bool> {
        if matches!(self.phase(), DownloadPhase::Failed { .. }) {
            info!(model = self.references.remote.name(), "retrying model download");
        }
        self.request_download()
    }

    pub fn note_attempt(&self, attempt: u32) {
        self.phase.send_replace(DownloadPhase::InFlight { attempt });
    }

    /// Records the outcome of a download. Returns `true` only for the call
    /// that moved the state to `Ready`.
    pub fn complete_download(&self, outcome: Result<(), String>) -> bool {
        match outcome {
            Ok(()) => {
                let fired = self.state.send_if_modified(|state| {
                    if *state == Availability::Ready {
                        return false;
                    }
                    *state = Availability::Ready;
                    true
                });
                if fired {
                    info!(model = self.references.remote.name(), "model ready");
                    events::emit_availability(self.sink.as_ref(), Availability::Ready);
                }
                self.phase.send_replace(DownloadPhase::Completed);
                fired
            }
            Err(error) => {
                if self.can_initiate_selection() {
                    return false;
                }
                warn!(
                    model = self.references.remote.name(),
                    "model download failed: {error}"
                );
                self.phase.send_replace(DownloadPhase::Failed { error });
                events::emit_availability(self.sink.as_ref(), Availability::NotReady);
                false
            }
        }
    }

    /// Picks the model a freshly selected image is labeled with.
    pub fn resolve_model_reference(&self) -> ModelReference {
        let remote = self.references.remote_reference();
        if self.policy == ResolutionPolicy::RemoteOnly {
            return remote;
        }
        let Some(local) = self.references.local_reference() else {
            return remote;
        };

        match self.provisioning.is_model_downloaded(&self.references.remote) {
            Ok(true) => remote,
            Ok(false) => local,
            Err(error) => {
                warn!("remote model check failed, using bundled model: {error:?}");
                local
            }
        }
    }

    fn ensure_download_service(self: &Arc<Self>) -> Result<ModelDownloadService> {
        let mut guard = self.downloads.lock();
        if guard.is_none() {
            let service = ModelDownloadService::new(
                self.provisioning.clone(),
                Arc::downgrade(self),
                self.sink.clone(),
                self.retry.clone(),
            )?;
            *guard = Some(service);
        }
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow!("download service unavailable"))
    }
}
