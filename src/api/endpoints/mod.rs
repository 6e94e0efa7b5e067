//! Endpoint handlers, one module per resource.

pub mod health;
pub mod history;
pub mod tasks;
pub mod upload;
