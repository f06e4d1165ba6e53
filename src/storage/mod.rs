//! Persistence of tasks, the check log, and per-day rollups.

pub mod activity_store;
pub mod connection;
pub mod entities;
pub mod migrations;
