pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod input;
pub mod logging;
pub mod pipeline;
pub mod types;

// Ports and adapters
pub mod app;
pub mod infra;

pub mod observability;
