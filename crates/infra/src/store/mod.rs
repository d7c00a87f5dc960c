//! Persistence boundary for the outbound pipeline.
//!
//! Every owner-scoped operation takes the owner id and includes it in its
//! predicate. The two cross-owner lookups (`find_by_outbound_message_id`,
//! `find_latest_by_email`) exist for the webhook path, which only has provider
//! correlation data.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    CampaignStore, EventLog, GeneratedEmailStore, JobQueue, LeadStore, StoreError, StoreResult,
    WorkerStateStore,
};

/// Everything the worker, matcher and service need from one backing store.
pub trait OutboundStore:
    LeadStore + CampaignStore + JobQueue + EventLog + GeneratedEmailStore + WorkerStateStore
{
}

impl<T> OutboundStore for T where
    T: LeadStore + CampaignStore + JobQueue + EventLog + GeneratedEmailStore + WorkerStateStore
{
}
