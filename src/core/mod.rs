//! Token Service Core Components
//!
//! Identifier generation and time source.

pub mod clock;
pub mod id;

pub use clock::*;
pub use id::*;
