//! hyrank-core - Core types and traits for hybrid search ranking
//!
//! This crate provides the foundational types, the candidate source
//! interface, configuration and error handling used throughout hyrank.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{HyrankError, Result};
pub use traits::*;
pub use types::*;
