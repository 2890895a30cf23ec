//! ActivityPub server-to-server federation engine.
//!
//! The engine receives activities into local inboxes, accepts client
//! submissions to local outboxes, and delivers the results to remote inboxes:
//!
//! - **Capabilities**: Application policy hooks (authentication, blocking, forwarding filter)
//! - **Recipients**: Bounded, cycle-safe expansion of addressing into inboxes
//! - **Forwarding**: The inbox forwarding rule for activities that reach local collections
//! - **Dispatch**: Per-type side effects with override, extension and fallback routes
//! - **Delivery**: Concurrent fan-out with per-inbox results and cancellation
//! - **HTTP**: An axum router for inbox/outbox endpoints and a reqwest client
//!
//! Storage, remote lookup and transport sit behind traits; in-memory
//! implementations are provided for embedding and tests.

pub mod actor;
pub mod capability;
pub mod client;
pub mod codec;
pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod forwarding;
pub mod handler;
pub mod processor;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod transport;
pub mod vocab;

pub use actor::{Actor, CollectionPage};
pub use capability::{Access, Callbacks, Capabilities, InboundRequest};
pub use client::{ApClient, ClientError, SignRequest};
pub use codec::{ActivityCodec, JsonCodec};
pub use delivery::{Deliverer, DeliveryFailure, DeliveryReport};
pub use directory::{Directory, MemoryDirectory, Resolved};
pub use dispatch::{
    ActivityHandler, DispatchReport, Dispatcher, Effect, EffectLog, ExtensionHandler,
    HandlerContext, Route, Side,
};
pub use engine::{Collaborators, FederationEngine, Outcome, Progress, Stage, Status};
pub use forwarding::{ForwardingDecider, ForwardingDecision, NotForwarded};
pub use handler::router;
pub use resolver::{Recipient, RecipientResolver, RecipientSet, RecursionContext, Seed};
pub use retry::RetryConfig;
pub use store::{ActivityStore, BlockRecord, FollowRecord, FollowState, MemoryStore, PageRequest};
pub use transport::Transport;
pub use vocab::{Activity, ActivityKind, ApObject, Reference, StandardKind};
