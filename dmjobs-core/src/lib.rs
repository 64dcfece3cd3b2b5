//! dmjobs Core
//!
//! Core types and abstractions for the dmjobs job engine.
//!
//! This crate contains:
//! - Domain types: Job, its status machine, runner and schedule descriptors,
//!   progress updates and document references
//! - DTOs: request/response shapes exchanged with callers of the engine

pub mod domain;
pub mod dto;
