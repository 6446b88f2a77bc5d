//! Engine-independent building blocks for the anime generator.
//!
//! Holds the job template store, the generation recipes that parameterize
//! templates, the media data model (remote descriptors and local records),
//! local filename conventions, output-root path containment and data-URL
//! decoding. Nothing in this crate performs network I/O.

pub mod data_url;
pub mod error;
pub mod generation;
pub mod media;
pub mod naming;
pub mod storage;
pub mod types;
pub mod workflow;
