//! Spec-by-spec lead/validate cycles over a persisted session.

pub mod cycle;
pub mod prompts;

pub use cycle::{CycleOrchestrator, RunOutcome};
pub use prompts::{ContextSpec, LeadPromptInput, build_lead_prompt};
