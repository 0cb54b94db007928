//! Deployment event bus

pub mod bus;
pub mod topics;
