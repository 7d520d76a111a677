//! Semantic grading of assistant replies and tool arguments.
//!
//! The judge is a flaky oracle by nature: it delegates to a secondary model
//! and that call can fail or return garbage. A failed judge call is reported
//! as [`Verdict::Unavailable`], which reads as "could not verify" in the
//! results, distinct from a verified mismatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use lenda_agent::caller::{CallOptions, ModelCaller, ToolChoice};
use lenda_core::message::Message;
use lenda_core::registry::ModelConfig;

const GRADING_PROMPT: &str = "You grade a loan-servicing assistant. Decide whether the ACTUAL \
reply is semantically equivalent to the EXPECTED reply: same facts, same commitments, same \
refusals. Wording, ordering, and politeness may differ. Respond with only a JSON object: \
{\"similar\": boolean, \"confidence\": number between 0 and 1, \"reason\": string}.";

const ARGS_PROMPT: &str = "You compare two JSON argument objects for a tool call. Decide \
whether ACTUAL carries the same meaning as EXPECTED: equivalent values under different \
formatting still match, missing or contradicting values do not. Respond with only a JSON \
object: {\"match\": boolean, \"reason\": string}.";

/// Three-valued grading outcome. `Unavailable` means the judge itself could
/// not run, not that the reply was wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Similar,
    Dissimilar,
    Unavailable,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimilarityVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reason: String,
}

impl SimilarityVerdict {
    pub fn is_similar(&self) -> bool {
        self.verdict == Verdict::Similar
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self { verdict: Verdict::Unavailable, confidence: 0.0, reason: reason.into() }
    }
}

/// Outcome of one argument comparison, strict or semantic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArgComparison {
    pub matched: bool,
    pub reason: String,
}

impl ArgComparison {
    pub fn matched(reason: impl Into<String>) -> Self {
        Self { matched: true, reason: reason.into() }
    }

    pub fn mismatch(reason: impl Into<String>) -> Self {
        Self { matched: false, reason: reason.into() }
    }
}

/// The grading seam consumed by the scenario runner. Kept narrow so tests
/// can substitute a deterministic stub.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn similarity(&self, expected: &str, actual: &str) -> SimilarityVerdict;
    async fn judge_args(&self, expected: &Value, actual: &Value) -> ArgComparison;
}

/// Judge backed by a secondary model call with a fixed grading prompt.
pub struct ModelJudge<'a> {
    caller: &'a dyn ModelCaller,
    model: ModelConfig,
    threshold: f64,
}

impl<'a> ModelJudge<'a> {
    pub fn new(caller: &'a dyn ModelCaller, model: ModelConfig, threshold: f64) -> Self {
        Self { caller, model, threshold }
    }

    async fn grade(&self, system: &str, user: String) -> Option<Value> {
        let messages = vec![Message::system(system), Message::user(user)];
        let options = CallOptions { temperature: 0.0, max_tokens: 512 };
        let response = match self
            .caller
            .invoke(&self.model, &messages, &[], ToolChoice::None, &options)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(event_name = "evals.judge.call_failed", error = %error, "judge call failed");
                return None;
            }
        };
        response.content.as_deref().and_then(extract_json)
    }
}

#[async_trait]
impl Judge for ModelJudge<'_> {
    async fn similarity(&self, expected: &str, actual: &str) -> SimilarityVerdict {
        let user = format!("EXPECTED:\n{expected}\n\nACTUAL:\n{actual}");
        let Some(grade) = self.grade(GRADING_PROMPT, user).await else {
            return SimilarityVerdict::unavailable("judge call failed or returned no JSON");
        };

        let similar = grade["similar"].as_bool().unwrap_or(false);
        let confidence = grade["confidence"].as_f64().unwrap_or(0.0);
        let reason = grade["reason"].as_str().unwrap_or("no reason given").to_string();

        let verdict = if similar && confidence >= self.threshold {
            Verdict::Similar
        } else {
            Verdict::Dissimilar
        };
        SimilarityVerdict { verdict, confidence, reason }
    }

    async fn judge_args(&self, expected: &Value, actual: &Value) -> ArgComparison {
        let user = format!("EXPECTED:\n{expected}\n\nACTUAL:\n{actual}");
        let Some(grade) = self.grade(ARGS_PROMPT, user).await else {
            return ArgComparison::mismatch("judge call failed or returned no JSON");
        };
        ArgComparison {
            matched: grade["match"].as_bool().unwrap_or(false),
            reason: grade["reason"].as_str().unwrap_or("no reason given").to_string(),
        }
    }
}

/// Pulls a JSON object out of judge output, tolerating markdown code fences
/// and surrounding prose.
fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Recursive structural match over the expected keys only. Extra actual keys
/// are ignored; a missing or differing expected key fails with a reason
/// naming the offending path.
pub fn match_args_strict(expected: &Value, actual: &Value) -> ArgComparison {
    match strict_mismatch(expected, actual, "") {
        None => ArgComparison::matched("all expected keys matched"),
        Some(reason) => ArgComparison::mismatch(reason),
    }
}

fn strict_mismatch(expected: &Value, actual: &Value, path: &str) -> Option<String> {
    match (expected, actual) {
        (Value::Object(expected_entries), Value::Object(actual_entries)) => {
            for (key, expected_value) in expected_entries {
                let child = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                match actual_entries.get(key) {
                    None => return Some(format!("missing key `{child}`")),
                    Some(actual_value) => {
                        if let Some(reason) = strict_mismatch(expected_value, actual_value, &child)
                        {
                            return Some(reason);
                        }
                    }
                }
            }
            None
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            if expected_items.len() != actual_items.len() {
                return Some(format!(
                    "array length differs at `{path}`: expected {}, got {}",
                    expected_items.len(),
                    actual_items.len()
                ));
            }
            for (index, (expected_item, actual_item)) in
                expected_items.iter().zip(actual_items).enumerate()
            {
                let child = format!("{path}[{index}]");
                if let Some(reason) = strict_mismatch(expected_item, actual_item, &child) {
                    return Some(reason);
                }
            }
            None
        }
        (expected, actual) => {
            if expected == actual {
                None
            } else {
                Some(format!("value differs at `{path}`: expected {expected}, got {actual}"))
            }
        }
    }
}
