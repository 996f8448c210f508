// Library exports for the server binary and integration tests

pub mod auth;
pub mod config;
pub mod db;
pub mod library;
pub mod lrc;
pub mod media_store;
pub mod server;
pub mod streaming;

// Test support (only available with test-utils feature)
#[cfg(feature = "test-utils")]
pub mod test_support;
