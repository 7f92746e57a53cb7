//! Guided session generation.
//!
//! Collects API credentials and a phone number, drives the account login
//! (including two-step verification) and exports a portable session string.

mod attempts;
mod error;
mod service;
mod state;

pub use attempts::AttemptCounter;
pub use error::FlowError;
pub use service::{ConversationService, Outbound, StepOutcome};
pub use state::{ConversationState, Termination};
