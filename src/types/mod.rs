//! Token Service Types
//!
//! Core type definitions for token records, clients, scopes and configuration.

pub mod client;
pub mod config;
pub mod token;
pub mod verification;

pub use client::*;
pub use config::*;
pub use token::*;
pub use verification::*;
