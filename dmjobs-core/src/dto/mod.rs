//! Data Transfer Objects
//!
//! Lightweight request and response shapes exchanged between the engine and
//! its callers. Engine-private job fields never appear in these types.

pub mod job;
