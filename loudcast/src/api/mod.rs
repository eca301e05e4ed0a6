//! API layer for HTTP request handling.
//!
//! - **[`handlers`]**: Axum route handlers for the upload and event
//!   stream endpoints

pub mod handlers;
