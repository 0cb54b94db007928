//! HTTP client for a running panel

pub mod client;
pub mod deployments;
