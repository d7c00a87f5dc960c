//! `leadflow-outbound`: the outbound delivery domain.
//!
//! Pure types and rules only; persistence and network calls live in
//! `leadflow-infra`.

pub mod backoff;
pub mod campaign;
pub mod event;
pub mod generated;
pub mod job;
pub mod lead;
pub mod worker;

pub use backoff::{RetryPolicy, backoff_seconds};
pub use campaign::CampaignTemplate;
pub use event::{EmailEvent, EmailEventType};
pub use generated::GeneratedEmail;
pub use job::{EnqueueOutcome, JobKind, OutboundJob};
pub use lead::{Lead, LeadStatus, LeadUpdate, normalize_email};
pub use worker::{DEFAULT_EMPTY_TICK_THRESHOLD, OUTBOUND_WORKER_ID, WorkerState};
