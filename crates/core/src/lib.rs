//! EATECH Core - Shared types for the offline edge.
//!
//! This crate provides the domain types used by every EATECH edge component:
//! - `edge` - Offline caching proxy, durable queue and background sync
//! - `cli` - Operator tooling for the local queue store
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Payloads that cross a trust boundary (queued
//! mutations, push messages, host commands) are parsed and validated here so
//! every consumer rejects bad input the same way.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices, emails, and lifecycle states
//! - [`queue`] - Queue classes, sync tags, and typed mutation payloads
//! - [`request`] - Request metadata and resource classification vocabulary
//! - [`push`] - Push payloads, notification action tables, and click routing
//! - [`message`] - Host-to-worker commands

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod message;
pub mod push;
pub mod queue;
pub mod request;
pub mod types;

pub use message::HostCommand;
pub use queue::{
    AnalyticsEvent, Mutation, MutationError, OrderLine, OrderSubmission, Payload, QueueClass,
    QueueEntry, SyncTag, VoiceCommand,
};
pub use types::*;
