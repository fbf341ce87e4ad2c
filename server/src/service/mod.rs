//! Service layer

pub mod command;
pub mod jail;
pub mod output;
pub mod registry;
pub mod shell;
