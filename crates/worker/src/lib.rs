//! Library half of the worker binary: configuration and command line, kept
//! separate from `main` so both can be tested.

pub mod cli;
pub mod config;
