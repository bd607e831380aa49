//! Core engine client functionality
//!
//! This module contains the session, transaction and enumeration logic, the
//! native descriptor layer the engine consumes, and an in-process engine.
//! It provides:
//!
//! - [`session`]: Sessions, transaction control and object CRUD
//! - [`transaction`]: The session-scoped transaction state machine
//! - [`enumerate`]: Paged rule enumeration
//! - [`arena`]: Bump allocator for native descriptors
//! - [`native`]: Native-layout descriptors built in an arena
//! - [`engine`]: The engine boundary trait
//! - [`memory`]: In-process engine implementation
//! - [`state`]: Persistent engine state file
//! - [`types`] and [`layers`]: Host value model and well-known identifiers
//! - [`error`]: Error types and engine status codes

pub mod arena;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod layers;
pub mod memory;
pub mod native;
pub mod session;
pub mod state;
pub mod transaction;
pub mod types;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
