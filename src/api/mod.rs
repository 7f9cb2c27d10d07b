//! Backend API surface: entity types, the fixed endpoint mapping, and the
//! reqwest-backed transport.

pub mod client;
pub mod types;

pub use client::{ApiCall, ApiClient, Transport};
