//! Autonomous coding-agent engine.
//!
//! A task goes in; the engine asks a model for the next step, parses the tool
//! calls out of its reply, checks them against a confirmation policy and a
//! command safety policy, executes them inside the project root, and repeats
//! until the model gives a final answer. Changes are then verified with the
//! project's own build/test/lint/typecheck commands, and failures are fed back
//! for a bounded number of fix attempts.
//!
//! - **[`core`]**: Pure logic (tool registry and schemas, parser, safety
//!   validator, diff engine, diagnostics). No I/O.
//! - **[`io`]**: Side effects (config file, subprocesses, filesystem, URL
//!   fetch, tool executor, verifier, prompts) and the model-call contract.
//!
//! Orchestration: [`session`] owns collaborators and state, [`step`] runs one
//! iteration, [`looping`] drives a task to a terminal state.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
