//! Transcript analysis: profile-driven prompt construction and
//! dependency-aware task dispatch against an AI provider.

pub mod orchestrator;
pub mod profile;

pub use orchestrator::{AnalysisOrchestrator, AnalysisResult, TaskOutcome, TaskState};
pub use profile::{render_prompt, AnalysisTask, OutputNormalization, Profile};
