//! HTTP API.
//!
//! Clients upload artifacts, submit a generation task, and poll it until it
//! reaches a terminal state. Finished reports are served from history.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{ctrl_c, serve, serve_on};
pub use types::ApiContext;
