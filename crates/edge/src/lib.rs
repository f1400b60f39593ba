//! EATECH offline edge library.
//!
//! A local proxy that sits between the EATECH apps and the backend and keeps
//! them usable without a network:
//!
//! - [`router`] - answers requests from versioned caches, one strategy per resource class
//! - [`db`] - durable `SQLite` queue of mutations made while offline
//! - [`sync`] - drains the queue to the backend when connectivity returns
//! - [`push`] - turns push payloads into notifications and routes clicks
//! - [`lifecycle`] - installs and activates cache versions
//!
//! [`runtime::WorkerRuntime`] wires the components together; [`routes::app`]
//! exposes them over HTTP.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod net;
pub mod push;
pub mod router;
pub mod routes;
pub mod runtime;
pub mod state;
pub mod sync;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
