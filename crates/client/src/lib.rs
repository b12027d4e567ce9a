//! Client side of markgo-shell.
//!
//! This crate provides the HTTP transport chain, page extraction, the soft
//! navigation router, the cache-tier agent and the offline mutation queue
//! shared by the server and its tests.

pub mod agent;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod queue;
pub mod router;

pub use agent::{AgentConfig, AgentPhase, AgentStatus, CacheAgent, IgnoredFailure};
pub use events::{EventBus, Signal};
pub use extract::{Link, PageDocument, PageSelectors, extract_links, parse_page};
pub use fetch::{Connectivity, FetchClient, FetchConfig, FetchRequest, FetchResponse, Transport};
pub use queue::{
    DrainOutcome, DrainReport, FailedCount, MutationQueue, PublishReceipt, QueueConfig, SubmitOutcome, TokenSource,
    spawn_connectivity_listener,
};
pub use router::{Activation, LinkActivation, LivePage, NavOutcome, NavPhase, Router, RouterConfig};
