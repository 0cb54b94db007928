//! Deployment module

pub mod compose;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod health;
pub mod orchestrator;
pub mod transcript;
