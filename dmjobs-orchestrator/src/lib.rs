//! dmjobs Orchestrator
//!
//! Runs jobs whose definitions live as documents in DMSS:
//! - Repository: job store and trigger store (Postgres or in-memory)
//! - Scheduler: one-shot and cron triggers, fired on a tick loop
//! - Handlers: pluggable execution backends resolved by runner type
//! - Service: the job lifecycle (register, run, status, remove, result)
//! - API: thin HTTP mapping onto the service

pub mod api;
pub mod config;
pub mod db;
pub mod handler;
pub mod repository;
pub mod scheduler;
pub mod service;
