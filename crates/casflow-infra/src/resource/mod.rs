//! Resource service clients.

pub mod http;
