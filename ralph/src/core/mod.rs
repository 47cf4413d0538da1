//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod controller;
pub mod ranges;
pub mod session;
pub mod stream;
pub mod types;
pub mod usage;
