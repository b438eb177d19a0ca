//! Core domain types: identifiers, job definitions, schedules and handlers.

pub mod handler;
pub mod job;
pub mod schedule;
pub mod types;
