#![deny(unsafe_code)]

//! Shared test utilities for the panbridge workspace.
//!
//! Provides reusable fixtures, config builders, a scriptable worker and a
//! recording notification backend so that individual crate tests stay
//! concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! panbridge-test-utils = { workspace = true }
//! ```

pub mod bridge;
pub mod config;
pub mod notify;
pub mod tracing_setup;
pub mod worker;
