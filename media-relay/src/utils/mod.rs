//! Shared helpers.

pub mod http_client;
pub mod url;
