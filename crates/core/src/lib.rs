//! Domain types and collaborator contracts for the generation-job
//! completion orchestrator.
//!
//! This crate has no internal dependencies. The adapters (`comfyui`,
//! `db`, the Redis lock store in `worker`) implement the traits defined
//! here, and the orchestrator only ever talks to those traits.

pub mod asset;
pub mod error;
pub mod generation;
pub mod lock_store;
pub mod persistence;
pub mod render_backend;
pub mod retry;
pub mod status;
pub mod types;
