//! wfkit - packet-filtering engine client
//!
//! Sessions, transactions and paged rule enumeration against a kernel
//! packet-filtering engine, with the engine's native descriptors built in a
//! bump arena.
//!
//! # Architecture
//!
//! - [`core`] - Sessions, transactions, enumeration, native descriptors and the engine boundary
//! - [`audit`] - Audit logging for every engine mutation made by the CLI
//! - [`validators`] - Input validation for display names, GUIDs, ports and networks
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (platform directories, etc.)
//!
//! # Safety Features
//!
//! - Transactions are all-or-nothing; closing a session aborts an open one
//! - Enumeration cursors are always released, even when a page fails
//! - Native descriptors never outlive the arena they were built in
//! - SHA-256 state file checksums
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::engine::Engine;
pub use core::error::{EngineError, Error, Result};
pub use core::memory::MemoryEngine;
pub use core::session::{Options, Session};
pub use core::types::{Action, FilterEnumFlags, FilterEnumType, Rule};
