//! Side-effecting collaborators: config, processes, files, network, model.

pub mod config;
pub mod fetch;
pub mod files;
pub mod model;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod tool_executor;
pub mod verifier;
