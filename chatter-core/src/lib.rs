//! Core of the chatter backend.
//!
//! Everything here is independent of the wire protocol: the data model, the
//! store capability interface and its backends, the per-channel broadcast
//! primitive and its registry, the authorization gate and the interceptor
//! stages that run around every call.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod intercept;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod shutdown;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use auth::{AuthError, AuthorizationGate, Credentials};
pub use broadcast::{ChannelRegistry, ChannelState, RegistryError, Subscription};
pub use config::Config;
pub use intercept::{CallContext, InterceptorChain, Rejection};
pub use logging::{init_logging_with_config, LogConfig, LogLevel};
pub use model::{Channel, ChannelId, Community, CommunityId, Identity, Message, MessageId, Role, UserId};
pub use store::{ChatStore, MemoryStore, SqlStore, StoreError, StoreResult};
