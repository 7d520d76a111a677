//! Size control for tool result payloads.
//!
//! Tool results flow straight back into the model's context, so an
//! unbounded payload (a base64 receipt image, a dump of every payment row)
//! can blow past provider token ceilings. This pass replaces oversized
//! string fields with a short placeholder that preserves the size signal
//! and the tool's success/failure shape, applied uniformly regardless of
//! tool identity.

use serde_json::Value;

/// General ceiling for any string field.
pub const MAX_STRING_BYTES: usize = 10 * 1024;

/// Tighter ceiling for fields named `image` (the conventional
/// `data.receipt.image` / `data.image` base64 slots).
pub const MAX_IMAGE_BYTES: usize = 1024;

/// Truncates oversized string fields anywhere in the payload. Idempotent:
/// placeholders are far below both ceilings, so a second pass is a no-op.
pub fn truncate_payload(value: Value) -> Value {
    truncate_value(value, None)
}

fn truncate_value(value: Value, field: Option<&str>) -> Value {
    match value {
        Value::String(text) => {
            let limit = if field == Some("image") { MAX_IMAGE_BYTES } else { MAX_STRING_BYTES };
            if text.len() > limit {
                Value::String(format!("[truncated: {} bytes]", text.len()))
            } else {
                Value::String(text)
            }
        }
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, nested)| {
                    let truncated = truncate_value(nested, Some(key.as_str()));
                    (key, truncated)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.into_iter().map(|item| truncate_value(item, field)).collect(),
        ),
        other => other,
    }
}
