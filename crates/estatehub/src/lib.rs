pub mod config;
pub mod discovery;
pub mod error;
pub mod requests;
pub mod telemetry;
