//! Service wiring.
//!
//! [`Controller`] builds storage, the event sink, both managers and the REST API
//! from a [`Config`](crate::configuration::Config) and owns their lifetimes.

pub mod controller_handler;

pub use controller_handler::Controller;
