//! # newsdesk
//!
//! Live retrieval-augmented answering over breaking news.
//!
//! newsdesk keeps polling a news search API, embeds every new article, and
//! inserts it into an in-memory vector index that queries read from at the
//! same time. Questions are embedded, matched against the index, and answered
//! by a chat model from the most similar recent articles. There is no
//! re-indexing step: an article is retrievable as soon as its insert returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ NewsAPI     │──▶│  Ingestion   │──▶│ VectorIndex  │
//! │ (connector) │   │ embed+insert │   │  (RwLock)    │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ k-NN
//!                   ┌──────────────┐   ┌──────▼───────┐
//!    question ─────▶│  RagEngine   │◀──│   context    │
//!                   │ embed+answer │   │ composition  │
//!                   └──────┬───────┘   └──────────────┘
//!                          ▼
//!                   ┌──────────────┐
//!                   │  HTTP / CLI  │
//!                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, environment overrides, validation |
//! | [`connector_news`] | News feed polling, normalization, dedup |
//! | [`embedding`] | Embedding providers and the caching processor |
//! | [`generation`] | Chat-completion providers |
//! | [`ingest`] | The background ingestion loop |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`service`] | The assembled [`service::NewsDesk`] |
//! | [`server`] | HTTP API |
//!
//! Models, the vector index and context composition live in the
//! `newsdesk-core` crate.

pub mod config;
pub mod connector_news;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod rag;
pub mod server;
pub mod service;

#[cfg(test)]
mod test_support;
