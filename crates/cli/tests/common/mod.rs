//! Common utilities for integration tests

pub mod cli;

#[allow(unused_imports)]
pub use cli::{CommandResult, FnotifyCommand};
