//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed parsing of `/history` outputs,
//! and a [`RenderBackend`](comfyrelay_core::render_backend::RenderBackend)
//! implementation that downloads generated assets to local storage.

pub mod api;
pub mod backend;
pub mod history;
