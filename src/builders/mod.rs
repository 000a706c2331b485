//! Builders
//!
//! Fluent builders for token server configuration and wiring.

pub mod config;
pub mod server;

pub use config::{token_server_config, TokenServerConfigBuilder};
pub use server::TokenServerBuilder;
