//! Domain models

pub mod action;
pub mod endpoint;
pub mod types;
