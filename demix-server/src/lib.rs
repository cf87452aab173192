//! demix-server library crate.
//!
//! Audio stem separation behind a single-worker job queue with a
//! content-addressed result cache.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod intake;
pub mod jobs;
pub mod logging;
pub mod retrieval;
pub mod separation;
pub mod utils;

pub use error::{Error, Result};
