//! Session lifecycle: one recording from start through transcription and
//! analysis to a terminal outcome.

pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionDeps, SessionOptions};
pub use state::{SessionOutcome, SessionSnapshot, SessionState};
