use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::availability::AvailabilityCoordinator;
use crate::core::errors::FlowError;
use crate::core::events::{self, EventSink};
use crate::core::selection::{PickerRequest, SelectAction, SelectionEvent};
use crate::core::settings::{default_assets_dir, SettingsManager};
use crate::inference::{CommandLabeling, ImageLabel, LabelInference, LabelerOptions};
use crate::models::{HttpProvisioner, ModelManager, ModelProvisioning};
use crate::output::LabelOutcome;

pub struct AppState {
    coordinator: Arc<AvailabilityCoordinator>,
    inference: Arc<dyn LabelInference>,
    sink: Arc<dyn EventSink>,
}

impl AppState {
    pub fn new(
        settings: &SettingsManager,
        provisioning: Arc<dyn ModelProvisioning>,
        inference: Arc<dyn LabelInference>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let current = settings.read();
        let coordinator = AvailabilityCoordinator::new(
            current.model_references()?,
            current.resolution_policy,
            current.download_conditions,
            current.retry.policy(),
            provisioning,
            sink.clone(),
        );
        Ok(Self {
            coordinator,
            inference,
            sink,
        })
    }

    /// Wires the HTTP provisioner and the command labeler from the user's
    /// settings and environment.
    pub fn from_environment(sink: Arc<dyn EventSink>) -> Result<Self> {
        let settings = SettingsManager::new()?;
        let current = settings.read();

        let manager = ModelManager::new()?;
        let models_root = manager.root().to_path_buf();
        let provisioner = HttpProvisioner::new(Arc::new(Mutex::new(manager)));
        let references = current.model_references()?;
        provisioner.register_source(&references.remote, current.model_source())?;

        let assets_dir = match current.assets_dir.clone() {
            Some(dir) => dir,
            None => default_assets_dir()?,
        };
        let inference = CommandLabeling::from_env(models_root, assets_dir)?;

        Self::new(&settings, Arc::new(provisioner), Arc::new(inference), sink)
    }

    pub fn coordinator(&self) -> Arc<AvailabilityCoordinator> {
        self.coordinator.clone()
    }

    pub fn initialize_models(&self) -> Result<()> {
        if !self.coordinator.request_download()? {
            debug!("model download not needed");
        }
        Ok(())
    }

    pub fn retry_model_download(&self) -> Result<bool> {
        self.coordinator.retry_download()
    }

    pub fn on_select_requested(&self) -> SelectAction {
        match self.coordinator.selection_gate() {
            Ok(()) => {
                let request = PickerRequest::default();
                events::emit_launch_picker(self.sink.as_ref(), &request);
                SelectAction::LaunchPicker(request)
            }
            Err(reason) => {
                events::emit_selection_denied(self.sink.as_ref(), reason);
                SelectAction::Denied(reason)
            }
        }
    }

    /// Handles the picker coming back. Labeling runs on the blocking pool of
    /// the current tokio runtime; the handle resolves once the outcome has
    /// been rendered.
    pub fn on_picker_result(
        &self,
        selection: Option<SelectionEvent>,
    ) -> Result<JoinHandle<LabelOutcome>, FlowError> {
        let selection = match selection {
            Some(event) if event.is_gallery_result() => event,
            _ => {
                debug!("picker returned without an image");
                return Err(FlowError::NoSelection);
            }
        };
        let runtime = Handle::try_current()
            .map_err(|_| FlowError::InferenceFailed("no async runtime available".into()))?;

        events::emit_image_selected(self.sink.as_ref(), &selection.locator);
        let coordinator = self.coordinator.clone();
        let inference = self.inference.clone();
        let sink = self.sink.clone();
        Ok(runtime.spawn_blocking(move || {
            label_selection(&coordinator, inference.as_ref(), sink.as_ref(), &selection)
        }))
    }
}

pub fn label_selection(
    coordinator: &AvailabilityCoordinator,
    inference: &dyn LabelInference,
    sink: &dyn EventSink,
    selection: &SelectionEvent,
) -> LabelOutcome {
    let request_id = Uuid::new_v4();
    let options = LabelerOptions::new(coordinator.resolve_model_reference());
    info!(%request_id, model = %options.model(), image = %selection.locator, "labeling image");

    let outcome = match run_labeler(inference, &options, &selection.locator) {
        Ok(labels) => {
            debug!(%request_id, count = labels.len(), "labels received");
            LabelOutcome::from_labels(&labels)
        }
        Err(error) => {
            warn!(%request_id, "{error}");
            LabelOutcome::failure()
        }
    };
    events::emit_outcome(sink, &outcome);
    outcome
}

fn run_labeler(
    inference: &dyn LabelInference,
    options: &LabelerOptions,
    locator: &str,
) -> Result<Vec<ImageLabel>, FlowError> {
    let labeler = inference
        .build_labeler(options)
        .map_err(|error| FlowError::InferenceFailed(format!("{error:#}")))?;
    labeler
        .process_image(locator)
        .map_err(|error| FlowError::InferenceFailed(format!("{error:#}")))
}
