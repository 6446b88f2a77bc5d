//! ComfyUI REST and WebSocket client library.
//!
//! Submits parameterized workflows, waits for them to finish through a race
//! between the WebSocket event stream and history polling, resolves the
//! produced media from the engine's history regardless of its response
//! shape, downloads results into the local output root and uploads source
//! images into the engine's input namespace.

pub mod api;
pub mod client;
pub mod endpoint;
pub mod listener;
pub mod messages;
pub mod persistence;
pub mod reconnect;
pub mod resolver;
pub mod upload;
pub mod watcher;
