//! `cadence-core` — primitives shared by every cadence crate: configuration,
//! the error type, logging setup, and the [`cell::Locked`] mutex cell.

pub mod cell;
pub mod config;
pub mod error;
pub mod logging;

pub use cell::Locked;
pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
