//! Completion worker: the orchestrator state machine plus the Redis-backed
//! lock store and attempt queue it runs on.

pub mod config;
pub mod dispatcher;
pub mod lock_store;
pub mod orchestrator;
pub mod runner;
pub mod status;
