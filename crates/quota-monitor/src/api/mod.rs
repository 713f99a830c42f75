//! HTTP API of the monitor.

pub mod endpoints;
pub mod error;
pub mod main;
