//! Core domain types
//!
//! This module contains the core domain structures used across dmjobs crates.
//! The job is persisted in two places (the engine's job store and the document
//! store), so these types carry both representations.

pub mod job;
pub mod progress;
pub mod reference;
pub mod runner;
pub mod schedule;
pub mod timestamp;
