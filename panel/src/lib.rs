//! vpanel Library
//!
//! Core modules of the vpanel deployment daemon.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
