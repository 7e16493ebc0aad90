//! Core types and building blocks for the gale server.
//!
//! This crate provides the transport-independent pieces of the engine:
//! - Canonical status lines and the three frozen content-type presets
//! - The closed [`HttpError`] set with mapped statuses
//! - [`Deferred`], a single-threaded one-shot completion cell
//! - [`Payload`], the value-shape model driving response dispatch
//! - [`Pool`], the LIFO object cache that recycles request contexts
//! - Structured logging types
//!
//! # Design Principles
//!
//! - Single-threaded cooperative execution: no atomics, no locks
//! - Zero-copy where possible; memoized outcomes are cheap clones
//! - No panics on user-reachable paths

#![forbid(unsafe_code)]
// Pedantic clippy lints allowed (style suggestions, not correctness issues)
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::single_match_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]

pub mod deferred;
pub mod error;
pub mod headers;
pub mod logging;
pub mod payload;
pub mod pool;
pub mod status;

pub use deferred::{Deferred, Settle};
pub use error::{ConfigError, ErrorKind, HttpError};
pub use headers::{HeaderPreset, ReplyHeaders};
pub use logging::{LogConfig, LogEntry, LogLevel, Logger, MemorySink};
pub use payload::Payload;
pub use pool::{Pool, Recycle};
pub use status::{is_known_status, status_line};
