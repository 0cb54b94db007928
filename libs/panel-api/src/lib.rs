//! Wire models for the vpanel HTTP API

pub mod models;
