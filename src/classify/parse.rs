use serde_json::{Map, Value};
use tracing::warn;

use super::Verdict;

/// Confidence used when the reply isn't usable JSON or leaves the field out.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Length, in characters, of the raw reply kept as rationale when parsing fails.
pub const FALLBACK_RATIONALE_LEN: usize = 200;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Parses a classification reply. The service is asked for JSON but may wrap it in a code fence or
/// not produce JSON at all, in which case a keyword heuristic takes over.
pub fn parse_reply(reply: &str) -> Verdict {
    match serde_json::from_str::<Value>(extract_payload(reply)) {
        Ok(Value::Object(payload)) => verdict_from_payload(&payload),
        Ok(other) => {
            warn!("Classification reply is JSON but not an object: {other}");
            heuristic_verdict(reply)
        }
        Err(e) => {
            warn!("Classification reply is not valid JSON: {e}");
            heuristic_verdict(reply)
        }
    }
}

/// Picks the JSON candidate: a ```json fence first, then any fence, then the whole reply.
fn extract_payload(reply: &str) -> &str {
    let fenced = |marker: &str| {
        reply.find(marker).map(|position| {
            let start = position + marker.len();
            let rest = &reply[start..];
            let end = rest.find(FENCE).unwrap_or(rest.len());
            rest[..end].trim()
        })
    };

    fenced(JSON_FENCE)
        .or_else(|| fenced(FENCE))
        .unwrap_or(reply)
}

fn verdict_from_payload(payload: &Map<String, Value>) -> Verdict {
    let on_task = payload
        .get("is_on_task")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(FALLBACK_CONFIDENCE);
    let doing = payload
        .get("what_user_is_doing")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let reasoning = payload
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("");

    Verdict {
        on_task,
        rationale: format!("{doing}. {reasoning}"),
        confidence,
    }
}

fn heuristic_verdict(reply: &str) -> Verdict {
    let lowered = reply.to_lowercase();
    Verdict {
        on_task: lowered.contains("true") || lowered.contains("yes"),
        rationale: reply.chars().take(FALLBACK_RATIONALE_LEN).collect(),
        confidence: FALLBACK_CONFIDENCE,
    }
}
