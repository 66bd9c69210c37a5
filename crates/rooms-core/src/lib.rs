//! # rooms-core
//!
//! Active room session management for a realtime chat client.
//!
//! This crate keeps a bounded set of room sessions live:
//!
//! - **Registry** - Session records and the LRU eviction policy
//! - **Reconciler** - Advances opened sessions to ready once upstream allows
//! - **Multiplexer** - Per-room and per-user stream subscriptions
//! - **Resync** - Fetches messages missed while disconnected
//! - **Presence** - Online users from the global status stream
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ RoomManager │────▶│  Registry   │◀────│ Reconciler  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Driver    │     │   Resync    │────▶│ Multiplexer │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │  Transport  │
//!                                         └─────────────┘
//! ```
//!
//! Collaborators outside this crate (room directory, message store,
//! renderer, hooks) are reached through the traits in [`collab`]. The
//! [`local`] module has in-memory implementations.

pub mod collab;
pub mod config;
pub mod deferred;
pub mod local;
pub mod manager;
pub mod metrics;
pub mod multiplexer;
pub mod presence;
pub mod reactive;
pub mod reconciler;
pub mod registry;
pub mod resync;
pub mod session;
pub mod store;
pub mod upstream;

pub use collab::{
    CallbackBus, Collaborators, HistoryBuffer, HookChain, MessageStore, RenderHandle, Renderer,
    Room, RoomDirectory, SubscriptionStore,
};
pub use config::{ManagerConfig, DEFAULT_MAX_ROOMS_OPEN};
pub use deferred::DeferredTask;
pub use manager::{ManagerDriver, ManagerStats, RoomManager};
pub use multiplexer::SYSTEM_USERNAME;
pub use presence::{PresenceTracker, UserPresence};
pub use reactive::ReadyHandle;
pub use reconciler::{ReconcileReport, Signals};
pub use registry::SessionRegistry;
pub use resync::{ConnectivityTracker, ResyncReport};
pub use session::{KeyError, SessionKey, SessionSnapshot};
pub use store::MemoryMessageStore;
pub use upstream::{Upstream, UpstreamHandle};
