//! # careguide core
//!
//! Runtime-agnostic logic for careguide: data models, chunking, the BM25
//! keyword index, the vector index contract, hybrid scoring, emergency
//! detection, provider contracts, and the agent state machine.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Anything that
//! blocks or waits (provider calls, timeouts, retries) lives in the
//! `careguide` application crate.

pub mod agent;
pub mod chunk;
pub mod embedding;
pub mod emergency;
pub mod error;
pub mod keyword;
pub mod models;
pub mod provider;
pub mod search;
pub mod vector;

pub use error::{CoreError, ProviderError, ProviderErrorKind, ProviderOp};
