//! Tracks how long you spend in specific programs. A daemon watches the foreground window and
//! records usage intervals of registered executables into an embedded document store, the cli
//! manages records and prints reports.
//!

pub mod app;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod store;
pub mod utils;
pub mod window_api;
