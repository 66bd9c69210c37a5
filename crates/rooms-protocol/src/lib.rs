//! # rooms-protocol
//!
//! Stream frame definitions for the rooms session manager.
//!
//! The message stream delivers room events (new messages, deletions) and
//! user-scoped events (private messages, subscription changes, status).
//! This crate defines those events as typed frames and the binary codec
//! used to move them across a transport.
//!
//! ## Frame Types
//!
//! - `RoomMessage` - A message posted in a room
//! - `DeleteMessage` / `DeleteMessageBulk` - Removals
//! - `UserMessage` - A private system message for the current user
//! - `SubscriptionsChanged` - The user's subscription record changed
//! - `UserStatus` - Another user's online status
//!
//! ## Example
//!
//! ```rust
//! use rooms_protocol::{codec, Frame, Message, User};
//!
//! let sender = User::new("u1", "alice");
//! let frame = Frame::room_message(Message::new("m1", "GENERAL", sender, "hi"));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod message;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{EventName, Frame, SubscriptionAction, Topic};
pub use message::{now_millis, BulkDelete, Message, RoomTag, Subscription, User};
