pub mod app_state;
pub mod availability;
pub mod errors;
pub mod events;
pub mod selection;
pub mod settings;
