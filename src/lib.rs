// Library root; exposes internals for integration tests.
// The binary entry point is src/main.rs.

pub mod artifact;
pub mod bootstrap;
pub mod config;
pub mod env;
pub mod error;
pub mod logger;
pub mod primary;
pub mod shutdown;
pub mod status;
pub mod supervisor;
