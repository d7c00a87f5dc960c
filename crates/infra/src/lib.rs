//! Infrastructure layer: stores, external service clients, the outbound
//! worker and the inbound event matcher.

pub mod config;
pub mod delivery;
pub mod inbound;
pub mod service;
pub mod store;
pub mod transition;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, DeliveryConfig, OutboundConfig, PollerConfig, ServiceConfig};
pub use delivery::{DeliveryError, DeliveryProvider, OutgoingEmail, ReceivedEmail, ResendProvider, SendReceipt};
pub use inbound::{BounceKind, InboundBounce, InboundError, InboundMatcher, InboundReply, MatchOutcome};
pub use service::{LeadStartResult, MarkRepliedOutcome, OutboundService, ServiceError, StartResult};
pub use store::{InMemoryStore, OutboundStore, PostgresStore, StoreError, StoreResult};
pub use transition::{TransitionOutcome, transition};
pub use worker::{EmptyTick, LifecycleController, StartOutcome, TickEngine, TickError, TickReport};
