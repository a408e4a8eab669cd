#![deny(unsafe_code)]

//! panbridge core runtime.
//!
//! The bridge sits between the pantalaimon control plane (command-line and
//! desktop clients) and the worker that talks to Matrix. Every control
//! operation becomes a [`Command`](message::Command) tagged with a fresh
//! correlation id and is queued for the worker without waiting. Worker events
//! come back on a second queue and a periodic dispatch loop turns them into
//! cache refreshes, outward signals and desktop notifications.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type for async trait
/// methods that need dynamic dispatch (`dyn Trait`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Presentation context runtime (dispatch timer, query handling, shutdown).
pub mod bridge;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// In-memory users/devices snapshots answering queries.
pub mod cache;
/// Command-issuing operations and cache-backed queries.
pub mod control;
/// One-event-per-tick dispatch of worker events.
pub mod dispatch;
/// Correlation ids and their allocator.
pub mod ids;
/// Unix socket HTTP/JSON control API.
pub mod ipc;
/// Command and event message types.
pub mod message;
/// Desktop notifications with action callbacks.
pub mod notify;
/// Line-delimited JSON link to an out-of-process worker.
pub mod pipe;
/// The command and event queues between bridge and worker.
pub mod queue;
/// Outward signals and their polling history.
pub mod signals;
/// Read-only storage boundary.
pub mod store;

pub use bridge::{Bridge, BridgeError, QueryHandle, ShutdownSignal};
pub use control::{CommandHandle, ControlSurface};
pub use dispatch::{Dispatcher, Tick};
pub use ids::{IdAllocator, MessageId};
pub use message::{Command, CommandKind, Event};
pub use notify::{Notification, NotificationBackend, Notifier, NotifySendBackend};
pub use queue::{BridgeQueues, WorkerEndpoint};
pub use signals::{Signal, SignalBus, SignalRecord};
pub use store::{MemoryStore, PanStore, SnapshotFileStore};
