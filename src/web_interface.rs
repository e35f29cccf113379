//! REST surface.
//!
//! JSON over HTTP with `warp`; every error is a `{ "message": ... }` body with a
//! 4xx/5xx status.

pub mod routes;
pub mod types;
pub mod web_server;

pub use routes::ApiContext;
pub use web_server::WebServer;
