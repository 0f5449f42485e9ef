//! # careguide
//!
//! Hybrid retrieval and agentic answer orchestration for patient-facing
//! procedure guidance.
//!
//! The pure algorithms (chunking, BM25, score merging, emergency detection,
//! the state-machine table) live in `careguide-core`. This crate adds
//! everything that waits on the outside world: configuration, the provider
//! gateway, HTTP providers, concurrent retrieval, ingestion, and the
//! request driver.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────────┐
//! │  Corpus  │──▶│   Ingestor   │──▶│ Keyword + Vector     │
//! │ (files)  │   │ chunk+embed  │   │ snapshots (swapped)  │
//! └──────────┘   └──────────────┘   └─────────┬───────────┘
//!                                             │
//!   query ─▶ Emergency ─▶ Decide ─▶ Retrieve ◀┘ ─▶ Grade ─▶ (Rewrite) ─▶ Generate ─▶ Safety
//!                                                                    │
//!                                     every provider call ─▶ ProviderGateway
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`cancellation`] | Cooperative per-request cancellation |
//! | [`gateway`] | Retry, timeout, and backpressure for provider calls |
//! | [`providers`] | OpenAI, Ollama, and disabled providers |
//! | [`prompts`] | Prompt builders for every chat op |
//! | [`retrieval`] | Concurrent hybrid retrieval |
//! | [`ingest`] | Single-writer ingestion with atomic publication |
//! | [`corpus`] | Filesystem corpus scanning |
//! | [`orchestrator`] | Agent state-machine driver |
//! | [`engine`] | Component wiring |

pub mod cancellation;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod gateway;
pub mod ingest;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retrieval;
