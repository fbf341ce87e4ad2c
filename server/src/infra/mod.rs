//! Infrastructure layer

pub mod catalog;
pub mod sqlite;
pub mod ssh;
