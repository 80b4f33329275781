use std::{
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::core::availability::AvailabilityCoordinator;
use crate::core::errors::FlowError;
use crate::core::events::{self, EventSink};

use super::manager::{ModelStatus, RemoteModelRecord};
use super::provisioner::{DownloadConditions, ModelProvisioning};
use super::reference::RemoteModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): doubles each
    /// time, never above `max_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelDownloadJob {
    pub model: RemoteModel,
    pub conditions: DownloadConditions,
}

#[derive(Debug, Clone)]
pub struct ModelDownloadService {
    sender: Sender<ModelDownloadJob>,
}

impl ModelDownloadService {
    pub fn new(
        provisioning: Arc<dyn ModelProvisioning>,
        coordinator: Weak<AvailabilityCoordinator>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded();
        thread::Builder::new()
            .name("model-download".into())
            .spawn(move || worker_loop(receiver, provisioning, coordinator, sink, retry))
            .context("spawn model download worker")?;
        Ok(Self { sender })
    }

    pub fn queue(&self, job: ModelDownloadJob) -> Result<()> {
        self.sender
            .send(job)
            .context("send model download job to worker")
    }
}

fn worker_loop(
    receiver: Receiver<ModelDownloadJob>,
    provisioning: Arc<dyn ModelProvisioning>,
    coordinator: Weak<AvailabilityCoordinator>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
) {
    for job in receiver.iter() {
        let outcome = run_job(&job, provisioning.as_ref(), &coordinator, sink.as_ref(), &retry);
        // The app may have been torn down while the download was running.
        let Some(coordinator) = coordinator.upgrade() else {
            debug!("coordinator dropped, discarding download outcome");
            break;
        };
        coordinator.complete_download(outcome.map_err(|error| error.to_string()));
    }
}

fn run_job(
    job: &ModelDownloadJob,
    provisioning: &dyn ModelProvisioning,
    coordinator: &Weak<AvailabilityCoordinator>,
    sink: &dyn EventSink,
    retry: &RetryPolicy,
) -> std::result::Result<(), FlowError> {
    let name = job.model.name();
    let mut attempt = 1;
    loop {
        if let Some(coordinator) = coordinator.upgrade() {
            coordinator.note_attempt(attempt);
        }
        emit_status(sink, name, ModelStatus::Downloading { progress: 0.0 });

        let mut last_reported = 0.0f32;
        let result = provisioning.download(&job.model, &job.conditions, &mut |progress| {
            // Throttle to whole percents.
            if progress - last_reported >= 0.01 || progress >= 1.0 {
                last_reported = progress;
                emit_status(sink, name, ModelStatus::Downloading { progress });
            }
        });

        match result {
            Ok(()) => {
                emit_status(sink, name, ModelStatus::Installed);
                return Ok(());
            }
            Err(error) if attempt < retry.max_attempts => {
                let delay = retry.backoff_after(attempt);
                warn!(
                    model = name,
                    attempt,
                    "model download attempt failed, retrying in {delay:?}: {error:?}"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(error) => {
                emit_status(sink, name, ModelStatus::Error(error.to_string()));
                return Err(FlowError::DownloadFailed {
                    model: name.to_string(),
                    reason: format!("{error:#}"),
                });
            }
        }
    }
}

fn emit_status(sink: &dyn EventSink, name: &str, status: ModelStatus) {
    let mut record = RemoteModelRecord::new(name, None);
    record.status = status;
    events::emit_model_status(sink, &record);
}
