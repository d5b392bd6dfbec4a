//! autoencode library crate.
//!
//! Watches for new episodic releases, encodes each into the configured
//! quality tiers one item at a time, and publishes the results.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod services;

pub use error::{Error, Result};
