//! HTTP request handlers.
//!
//! - [`upload`]: multipart audio upload intake
//! - [`events`]: server-sent-events stream of analysis outcomes

pub mod events;
pub mod upload;
