//! Test utilities shared by the core and api test suites
//!
//! Enabled for the api crate through the `test-utils` feature.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
