use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use automl_labeler::core::events::ConsoleSink;
use automl_labeler::core::availability::DownloadPhase;
use automl_labeler::{AppState, Availability, FlowError, SelectAction, SelectionEvent};
use tracing::metadata::LevelFilter;
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(120);

fn setup_logging() {
    let filter = std::env::var("LABELER_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let images: Vec<String> = std::env::args().skip(1).collect();
    if images.is_empty() {
        return Err(anyhow!("usage: automl-labeler <image>..."));
    }

    let state = AppState::from_environment(Arc::new(ConsoleSink))?;
    state.initialize_models()?;

    let coordinator = state.coordinator();
    let mut availability = coordinator.wait_until_settled(READY_TIMEOUT).await;
    if availability == Availability::NotReady {
        if let DownloadPhase::Failed { error } = coordinator.phase() {
            warn!("model download failed ({error}), retrying once");
            state.retry_model_download()?;
            availability = coordinator.wait_until_settled(READY_TIMEOUT).await;
        }
    }
    if availability == Availability::NotReady {
        warn!("model not ready, selections will be refused");
    }

    for image in images {
        match state.on_select_requested() {
            SelectAction::LaunchPicker(request) => {
                info!(request_code = request.request_code, "picker launched");
            }
            SelectAction::Denied(reason) => {
                warn!("{}", FlowError::SelectionDenied(reason));
                continue;
            }
        }

        match state.on_picker_result(Some(SelectionEvent::from_gallery(image))) {
            Ok(handle) => {
                if let Err(error) = handle.await {
                    warn!("labeling task failed: {error}");
                }
            }
            Err(FlowError::NoSelection) => {}
            Err(error) => warn!("{error}"),
        }
    }

    Ok(())
}
