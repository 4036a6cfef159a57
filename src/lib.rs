pub mod analyzer;
pub mod config;
pub mod driver;
pub mod errors;
pub mod metrics;
pub mod params;
pub mod process;
pub mod report;
pub mod server;
pub mod types;
pub mod warmup;
