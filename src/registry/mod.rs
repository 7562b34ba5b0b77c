//! Listener registry
//!
//! Tracks the sinks of every connected listener. The transport layer calls
//! [`ListenerRegistry::register`] when a client connects, streams the returned
//! [`ListenerStream`] to it, and calls [`ListenerRegistry::unregister`] when the
//! connection goes away. The broadcaster prunes sinks whose stream was dropped
//! without an explicit unregister.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ListenerRegistry>
//!                  ┌──────────────────────────────┐
//!                  │ listeners: HashMap<Id, Sink> │
//!                  └──────────────┬───────────────┘
//!                                 │ snapshot per tick
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!    sink.write()            sink.write()            sink.write()
//!         │                       │                       │
//!    ListenerStream          ListenerStream          ListenerStream
//!    (HTTP body)             (HTTP body)             (dropped → pruned)
//! ```
//!
//! `bytes::Bytes` is reference counted, so every listener shares the same
//! chunk allocation.

pub mod error;
pub mod listener;
pub mod store;

pub use error::ListenerWriteError;
pub use listener::{ListenerId, ListenerSink, ListenerStream};
pub use store::ListenerRegistry;
