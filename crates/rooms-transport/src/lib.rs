//! # rooms-transport
//!
//! Stream transport abstraction for the rooms session manager.
//!
//! The session manager never talks to a network directly. It consumes a
//! publish/subscribe stream (listeners on `(topic, event)` pairs), one
//! request/reply call (missed messages since a timestamp) and a connectivity
//! signal, all through the [`Transport`] trait.
//!
//! [`LocalTransport`] is an in-process hub implementing the trait. It is used
//! by the simulation binary and by tests, and can front a real connection by
//! feeding it decoded frames.
//!
//! ```rust,ignore
//! use rooms_protocol::EventName;
//! use tenvis_rooms_transport::{LocalTransport, Transport};
//!
//! let transport = LocalTransport::new();
//! let id = transport.subscribe_room_event("GENERAL", EventName::RoomMessages, handler);
//! transport.publish(frame);
//! transport.unsubscribe_room_event("GENERAL", EventName::RoomMessages, id);
//! ```

pub mod local;
pub mod traits;

pub use local::{LocalTransport, MissedRequest, DEFAULT_LOG_CAPACITY};
pub use traits::{EventHandler, ListenerId, Transport, TransportError};
