//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live telemetry feed over server-sent events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Server-sent event transport for machine telemetry.
//!
//! [`SseServerBuilder`] re-emits a JSONL capture one line per interval, and
//! [`SseClient`] tails such a feed, reconnecting with backoff, and hands the
//! decoded [`r_mdash_engine::Sample`]s to the caller.

pub mod client;
pub mod errors;
pub mod server;
pub mod sse;

pub use client::{Backoff, FeedClientHandle, SseClient};
pub use errors::{FeedError, Result};
pub use server::{SseServerBuilder, SseServerHandle};
pub use sse::SseDecoder;
