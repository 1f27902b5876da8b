// ABOUTME: Library module for sqlferry
// ABOUTME: Exports drivers, SQL processing, and migration for use in binary and tests

pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod migration;
pub mod sql;
pub mod utils;

pub use error::{Error, Result};
