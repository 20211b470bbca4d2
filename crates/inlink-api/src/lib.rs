//! Backend API — one-time-code login, profile submission, approval requests.

pub mod client;
pub mod types;

pub use client::{BackendClient, HttpBackend};
pub use types::*;
