//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (model text, command lines, file contents) and return deterministic
//! outputs suitable for tests.

pub mod action_log;
pub mod budget;
pub mod cancel;
pub mod confirm;
pub mod diagnostics;
pub mod diff;
pub mod normalize;
pub mod parser;
pub mod partial;
pub mod safety;
pub mod tools;
pub mod types;
