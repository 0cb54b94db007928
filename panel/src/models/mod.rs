//! Data models

pub mod activity;
pub mod deployment;
pub mod project;
pub mod user;
