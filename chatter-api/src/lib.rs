//! gRPC surface of the chatter backend
//!
//! Three services share one [`ServiceContext`]: users, communities and
//! channels, and messages. Every call passes the [`CallGuard`] before its
//! handler runs.

pub mod context;
pub mod credentials;
pub mod error;
pub mod interceptor;
pub mod proto;
pub mod server;
pub mod services;

pub use context::ServiceContext;
pub use credentials::CredentialCarrier;
pub use error::{ApiError, ApiResult};
pub use interceptor::{CallGuard, CallInfo};
