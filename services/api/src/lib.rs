//! Parley API Library Crate
//!
//! The server-side proxy the voice demo apps put in front of the provider:
//! configuration, application state, handlers and routing. The `api` binary
//! is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
