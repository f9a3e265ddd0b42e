pub mod config;
pub mod dataset;
pub mod errors;
pub mod report;
pub mod runner;
pub mod types;
pub mod waiter;
