//! Caller credentials and authorization
//!
//! Credentials travel as call metadata under [`AUTH_UNAME_KEY`] and
//! [`AUTH_TOKEN_KEY`]; the transport layer extracts them and hands them to
//! [`AuthorizationGate`].

mod credentials;
mod gate;

pub use credentials::{generate_credentials, Credentials};
pub use gate::{AuthError, AuthorizationGate};

/// Metadata key carrying the username
pub const AUTH_UNAME_KEY: &str = "auth-uname";

/// Metadata key carrying the bearer token
pub const AUTH_TOKEN_KEY: &str = "auth-token";
