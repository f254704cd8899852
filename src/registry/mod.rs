//! Stream registry for shared push streams
//!
//! The registry keeps one connection per stream key and lets any number of
//! subscriptions share it. Each subscription tracks only its own listeners;
//! the entry tracks all of them so they can be replayed onto a fresh
//! connection after a suspend/resume cycle.
//!
//! # Architecture
//!
//! ```text
//!                          StreamRegistry (Arc)
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Key,   │
//!                     │   StreamEntry {         │
//!                     │     url, connection,    │
//!                     │     ref_count,          │
//!                     │     listeners           │
//!                     │   }                     │
//!                     │ >                       │
//!                     │ suspended: bool         │
//!                     └───────────┬─────────────┘
//!                                 │ (weak)
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [Subscription]          [Subscription]      [LifecycleController]
//!   on("order.updated")     on_error(...)       close_all / reconnect_all
//! ```
//!
//! # Connection lifetime
//!
//! An entry is created by the first `subscribe` for its key and removed, with
//! its connection closed, when the last subscription is released.
//! `close_all` only pauses: entries, counts and listeners survive it, and
//! `reconnect_all` opens new connections for every entry still in use.

pub mod config;
mod entry;
pub mod error;
mod listener;
pub mod store;
pub mod subscription;

pub use config::RegistryConfig;
pub use entry::StreamStats;
pub use error::RegistryError;
pub use store::{StreamRegistry, WeakStreamRegistry};
pub use subscription::Subscription;
