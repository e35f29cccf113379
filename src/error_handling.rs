//! Error types shared across the crate.
//!
//! Every subsystem has its own enum in [`types`]; conversions between them are
//! provided with `From` so errors bubble up with `?`.

pub mod types;
