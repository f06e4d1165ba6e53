//! Focus tracker that periodically captures the screen and asks whether it matches the task you
//! said you're working on. Unchanged screens are judged idle locally, everything else goes to a
//! vision model, and every verdict lands in a SQLite log with a per-day rollup.

pub mod capture;
pub mod classify;
pub mod cli;
pub mod monitor;
pub mod similarity;
pub mod storage;
pub mod utils;
