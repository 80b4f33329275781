use std::io::Write;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::core::availability::Availability;
use crate::core::selection::{DenyReason, PickerRequest};
use crate::models::RemoteModelRecord;
use crate::output::LabelOutcome;

pub const EVENT_MODEL_STATUS: &str = "model-status";
pub const EVENT_AVAILABILITY: &str = "availability";
pub const EVENT_LAUNCH_PICKER: &str = "launch-picker";
pub const EVENT_SELECTION_DENIED: &str = "selection-denied";
pub const EVENT_IMAGE_SELECTED: &str = "image-selected";
pub const EVENT_LABELS: &str = "labels";
pub const EVENT_ALERT: &str = "alert";

/// Receives everything the presentation layer is expected to show.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub fn emit_model_status(sink: &dyn EventSink, record: &RemoteModelRecord) {
    emit_serialized(sink, EVENT_MODEL_STATUS, record);
}

pub fn emit_availability(sink: &dyn EventSink, availability: Availability) {
    emit_serialized(sink, EVENT_AVAILABILITY, &availability);
}

pub fn emit_launch_picker(sink: &dyn EventSink, request: &PickerRequest) {
    emit_serialized(sink, EVENT_LAUNCH_PICKER, request);
}

pub fn emit_selection_denied(sink: &dyn EventSink, reason: DenyReason) {
    sink.emit(
        EVENT_SELECTION_DENIED,
        json!({ "reason": reason, "message": reason.message() }),
    );
}

pub fn emit_image_selected(sink: &dyn EventSink, locator: &str) {
    sink.emit(EVENT_IMAGE_SELECTED, Value::String(locator.to_string()));
}

pub fn emit_outcome(sink: &dyn EventSink, outcome: &LabelOutcome) {
    match outcome {
        LabelOutcome::Labels(text) => sink.emit(EVENT_LABELS, Value::String(text.clone())),
        LabelOutcome::Alert(message) => {
            sink.emit(EVENT_ALERT, Value::String(message.to_string()))
        }
    }
}

fn emit_serialized<T: Serialize + ?Sized>(sink: &dyn EventSink, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit(event, value),
        Err(error) => warn!("failed to serialize {event} payload: {error}"),
    }
}

#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &str, payload: Value) {
        info!(event, %payload, "event");
    }
}

/// Writes rendered labels and alerts to stdout; everything else goes to the
/// log.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &str, payload: Value) {
        let text = match (event, &payload) {
            (EVENT_LABELS, Value::String(text)) => text.clone(),
            (EVENT_ALERT | EVENT_SELECTION_DENIED, _) => {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| payload.as_str())
                    .unwrap_or_default();
                format!("! {message}\n")
            }
            _ => {
                TracingSink.emit(event, payload);
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<(String, Value)>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<(String, Value)>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: Value) {
        // The receiving side may already be gone during shutdown.
        let _ = self.sender.send((event.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::UNABLE_TO_DETECT;

    #[test]
    fn outcome_emits_exactly_one_event() {
        let (sink, events) = ChannelSink::new();
        emit_outcome(&sink, &LabelOutcome::Labels("cat:87 %\n".into()));
        emit_outcome(&sink, &LabelOutcome::Alert(UNABLE_TO_DETECT));

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], (EVENT_LABELS.to_string(), json!("cat:87 %\n")));
        assert_eq!(received[1], (EVENT_ALERT.to_string(), json!(UNABLE_TO_DETECT)));
    }

    #[test]
    fn denial_carries_user_message() {
        let (sink, events) = ChannelSink::new();
        emit_selection_denied(&sink, DenyReason::ModelDownloading);
        let (event, payload) = events.try_recv().unwrap();
        assert_eq!(event, EVENT_SELECTION_DENIED);
        assert_eq!(payload["reason"], json!("model-downloading"));
        assert_eq!(
            payload["message"],
            json!(DenyReason::ModelDownloading.message())
        );
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (sink, events) = ChannelSink::new();
        drop(events);
        emit_availability(&sink, Availability::Ready);
    }
}
