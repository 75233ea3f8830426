//! # newsdesk core
//!
//! Runtime-agnostic logic for newsdesk: document and answer models, the
//! in-memory vector index, context composition, and the provider traits
//! that the application crate implements.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. Provider
//! traits are async (via `async-trait`) but make no assumption about the
//! executor that drives them.

pub mod context;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod models;
