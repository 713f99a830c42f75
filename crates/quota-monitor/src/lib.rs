pub mod aggregator;
pub mod alarm;
pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod remediation;
pub mod render;
pub mod source;
pub mod store;
