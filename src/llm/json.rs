use serde_json::Value;
use tracing::warn;

/// Extract a JSON object from a model reply.
///
/// Models wrap JSON in markdown fences or prose despite instructions; strip
/// fences first, then fall back to the outermost brace pair.
pub fn extract_json(text: &str) -> Option<Value> {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    let cleaned = cleaned.trim();

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(value) => Some(value),
        Err(_) => {
            let head: String = text.chars().take(200).collect();
            warn!("could not parse JSON from model reply: {head}");
            None
        }
    }
}
