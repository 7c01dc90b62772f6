pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;
