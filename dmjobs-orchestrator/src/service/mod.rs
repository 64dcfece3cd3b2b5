//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The job service drives the lifecycle on top of the stores, the handler
//! registry and the scheduler.

pub mod job;

pub use job::{JobError, JobService};
