//! Bridge IPC: Unix domain socket transport for `panctl`.
//!
//! The bridge exposes its control surface as an HTTP/JSON API over a Unix
//! socket. Command routes return the correlation id immediately; the outcome
//! arrives later as a `Response` signal, which clients poll from `/signals`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌──────────────┐
//! │  panctl  │───────────────────────────▶│  IPC Server  │
//! │          │  HTTP/1.1 + JSON           │  (axum)      │
//! └──────────┘                            └──────┬───────┘
//!                                                │ commands / queries
//!                                         ┌──────▼───────┐
//!                                         │    Bridge    │
//!                                         │     task     │
//!                                         └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError};
pub use server::{DEFAULT_SOCKET_PATH, IpcState};
pub use types::*;
