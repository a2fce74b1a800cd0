//! promptdex CLI – argument parsing and command runners.
//!
//! Split out of `main.rs` so integration tests can drive the runners
//! directly.

pub mod cli;
