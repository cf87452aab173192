//! Repository layer for data access.

pub mod job;

pub use job::{JobRepository, SqlxJobRepository};
