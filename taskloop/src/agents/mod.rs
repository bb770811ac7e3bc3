//! LLM-backed components of the agent loop.
//!
//! Each component renders its prompt, calls the completion service and decodes
//! the reply. Decode failures come back as [`Decoded::Unstructured`]; only
//! completion service errors are returned as `Err`.

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::core::sanitize::{Decoded, PayloadKind, decode_payload};
use crate::io::completion::{CompletionRequest, CompletionService};

pub mod controller;
pub mod executor;
pub mod planner;
pub mod reflector;

/// Prompt budget and sampling temperature for one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub prompt_budget_bytes: usize,
    pub temperature: f32,
}

pub(crate) fn request_payload<S, T>(
    service: &S,
    request: &CompletionRequest,
    kind: PayloadKind,
) -> Result<Decoded<T>>
where
    S: CompletionService,
    T: DeserializeOwned,
{
    let raw = service.complete(request)?;
    Ok(decode_payload(&raw, kind))
}
