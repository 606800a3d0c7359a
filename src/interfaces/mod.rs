//! Outer adapters: the HTTP API and CSV export.

pub mod csv;
pub mod http;
