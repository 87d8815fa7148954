//! Push notification plumbing for Warden.
//!
//! This crate provides:
//! - The length-prefixed frame codec shared by authority and enforcement points
//! - `NotificationTransport`, the concurrent at-most-once fan-out
//! - The subscription registry
//! - The dispatcher task that feeds escalation events to the transport

pub mod dispatcher;
pub mod frame;
pub mod registry;
pub mod transport;

pub use dispatcher::{event_channel, EventReceiver, EventSender, NotificationDispatcher};
pub use frame::{decode_event, encode_event, encode_frame, read_frame, MAX_FRAME_SIZE};
pub use registry::SubscriptionRegistry;
pub use transport::{NotificationTransport, PushReport};
