//! Per-channel broadcast engine
//!
//! [`ChannelState`] is the in-memory, append-only log of one channel. Writers
//! call [`ChannelState::append`]; readers either take a [`ChannelState::snapshot`]
//! or hold a [`Subscription`], a private cursor that walks the log in order
//! and parks on the state's notifier when it reaches the tail. Slow readers
//! never miss messages, they just fall further behind.
//!
//! [`ChannelRegistry`] maps channel ids to their states, loading channels
//! from the store the first time they are referenced.

mod channel_state;
mod registry;

pub use channel_state::{ChannelState, Subscription};
pub use registry::{ChannelRegistry, RegistryError};
