//! End-to-end generation jobs: parameterize a workflow template, upload the
//! source image when one is needed, submit, wait for completion and persist
//! the results locally.

pub mod generator;
pub mod source;
pub mod status;
