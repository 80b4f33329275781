pub mod core;
pub mod inference;
pub mod models;
pub mod output;

pub use crate::core::app_state::AppState;
pub use crate::core::availability::{Availability, AvailabilityCoordinator, ResolutionPolicy};
pub use crate::core::errors::FlowError;
pub use crate::core::selection::{SelectAction, SelectionEvent};
