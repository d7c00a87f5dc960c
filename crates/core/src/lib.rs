//! `leadflow-core`: foundation building blocks shared by every crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the domain error model, and the clock abstraction.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{CampaignId, EmailEventId, GeneratedEmailId, JobId, LeadId, OwnerId};
