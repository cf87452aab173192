//! Database row models.

pub mod job;

pub use job::{JobDbModel, JobExternalRefDbModel};
