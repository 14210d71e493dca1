//! Model-call collaborator contract.
//!
//! The transport (HTTP client, streaming protocol, credentials) lives outside
//! the engine. Implementations turn a [`ModelRequest`] into a
//! [`ModelResponse`], delivering partial text through `on_chunk` as it
//! streams.

use anyhow::Result;
use serde_json::Value;

use crate::core::cancel::CancelToken;
use crate::core::tools::SchemaDialect;
use crate::core::types::{Message, ModelResponse};

#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    /// Conversation so far, task first.
    pub messages: &'a [Message],
    pub dialect: SchemaDialect,
    /// Tool schemas rendered in `dialect`.
    pub tools: &'a [Value],
}

pub trait ModelClient {
    /// Request the next turn.
    ///
    /// Implementations should watch `cancel` while streaming and return early
    /// once it is set; an `Err` ends the task as failed.
    fn complete(
        &self,
        request: &ModelRequest<'_>,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ModelResponse>;
}
