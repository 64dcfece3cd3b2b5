//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository persists one kind of record; Postgres in production,
//! in-memory for embedding and tests.

pub mod job;
pub mod memory;
pub mod trigger;

pub use job::{JobStore, PgJobStore, StoreError};
pub use memory::{InMemoryJobStore, InMemoryTriggerStore};
pub use trigger::{PgTriggerStore, Trigger, TriggerKind, TriggerStore};
