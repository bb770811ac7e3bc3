//! Response sanitizer and the shared decode-with-fallback utility.
//!
//! Completion text is decoded in two steps: [`sanitize`] removes markdown code
//! fence wrapping, then [`decode_payload`] parses the inner text. A parse
//! failure never becomes an error here. It is returned as
//! [`Decoded::Unstructured`] so each call site can apply its own fallback.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+.-]*\s*").expect("leading fence regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("trailing fence regex"));

/// Strip markdown code fences from completion text.
///
/// Removes a leading fence (with optional language tag) and a trailing fence,
/// repeating until neither is present, and trims the result. Text without
/// fences is only trimmed. Applying it twice yields the same text.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let without_leading = LEADING_FENCE.replace(&current, "");
        let stripped = TRAILING_FENCE.replace(&without_leading, "");
        let next = stripped.trim();
        if next == current {
            return current;
        }
        current = next.to_string();
    }
}

/// Which component produced an undecodable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Plan,
    Execution,
    Reflection,
    Decision,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Plan => "planning failed",
            Self::Execution => "execution unstructured",
            Self::Reflection => "reflection unstructured",
            Self::Decision => "decision unstructured",
        };
        f.write_str(label)
    }
}

/// Structured-payload parse failure. Absorbed at the component boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct DecodeFailure {
    pub kind: PayloadKind,
    pub reason: String,
}

/// Outcome of decoding one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    /// Payload did not decode. `raw` is the sanitized completion text.
    Unstructured { raw: String, failure: DecodeFailure },
}

impl<T> Decoded<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    pub fn parsed(self) -> Option<T> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Unstructured { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Self::Parsed(value) => Decoded::Parsed(f(value)),
            Self::Unstructured { raw, failure } => Decoded::Unstructured { raw, failure },
        }
    }

    /// Resolve to a value, using `fallback` (given the raw text) on failure.
    pub fn or_else(self, fallback: impl FnOnce(&str, &DecodeFailure) -> T) -> T {
        match self {
            Self::Parsed(value) => value,
            Self::Unstructured { raw, failure } => fallback(&raw, &failure),
        }
    }
}

/// Sanitize `raw` and decode it as `T`.
pub fn decode_payload<T: DeserializeOwned>(raw: &str, kind: PayloadKind) -> Decoded<T> {
    let cleaned = sanitize(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(value) => Decoded::Parsed(value),
        Err(err) => {
            let failure = DecodeFailure {
                kind,
                reason: err.to_string(),
            };
            warn!(kind = %kind, error = %err, bytes = cleaned.len(), "payload not decodable, using fallback");
            Decoded::Unstructured {
                raw: cleaned,
                failure,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Decision, PlanOutput};

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"plan\": [\"a\"]}\n```";
        assert_eq!(sanitize(raw), "{\"plan\": [\"a\"]}");
    }

    #[test]
    fn strips_fence_with_other_language_tag() {
        assert_eq!(sanitize("  ```javascript\n{}\n```  "), "{}");
        assert_eq!(sanitize("```\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn leaves_unfenced_text_trimmed() {
        assert_eq!(sanitize("  plain answer \n"), "plain answer");
        assert_eq!(sanitize("use `code` inline"), "use `code` inline");
    }

    #[test]
    fn strips_unbalanced_fences() {
        assert_eq!(sanitize("```json\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(sanitize("{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "```json\n{\"a\": 1}\n```",
            "``` ```x```",
            "```\n```json\n{}\n```\n```",
            "no fences at all",
            "```",
            "",
            "   ``` \n text ``` ",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn decode_payload_parses_fenced_json() {
        let decoded: Decoded<PlanOutput> =
            decode_payload("```json\n{\"plan\": [\"one\", \"two\"]}\n```", PayloadKind::Plan);
        let plan = decoded.parsed().expect("parsed");
        assert_eq!(plan.plan, vec!["one", "two"]);
    }

    #[test]
    fn decode_payload_reports_failure_with_sanitized_raw() {
        let decoded: Decoded<PlanOutput> =
            decode_payload("```\nnot json at all\n```", PayloadKind::Plan);
        match decoded {
            Decoded::Unstructured { raw, failure } => {
                assert_eq!(raw, "not json at all");
                assert_eq!(failure.kind, PayloadKind::Plan);
                assert!(failure.to_string().starts_with("planning failed"));
            }
            Decoded::Parsed(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn or_else_applies_call_site_default() {
        let decoded: Decoded<Decision> = decode_payload("I think we should plan", PayloadKind::Decision);
        assert!(!decoded.is_parsed());
        let decision = decoded.or_else(|_, _| Decision::fallback());
        assert_eq!(decision, Decision::fallback());
    }
}
