//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod changeset;
pub mod naming;
pub mod plan;
pub mod scope;
pub mod types;
