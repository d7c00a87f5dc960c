//! `leadflow-ai`
//!
//! **Responsibility:** AI email-generation boundary.
//!
//! This crate is intentionally **not** part of the domain model:
//! - It must not depend on lead/job/campaign types.
//! - It must not touch persistence.
//! - It turns a template plus recipient attributes into an email draft.

pub mod gemini;
pub mod generator;
pub mod prompts;
pub mod result;

pub use gemini::{GeminiConfig, GeminiGenerator};
pub use generator::{EmailGenerator, LeadProfile, PreviousEmail, TemplateInput};
pub use result::{EmailDraft, GenerationError};
