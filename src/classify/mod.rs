//! Turns a frame and the stated task into a [Verdict].
//!
//! Idle frames are judged locally: an unchanged screen carries nothing worth a remote call, so the
//! classifier answers "off task" with high confidence straight away. Changed frames go to a
//! [ClassificationService] and its reply is parsed by [parse::parse_reply].

pub mod anthropic;
pub mod parse;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::capture::Frame;

/// Confidence attached to verdicts made without asking the service.
pub const IDLE_CONFIDENCE: f64 = 0.9;

/// The classifier's on-task/off-task decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub on_task: bool,
    pub rationale: String,
    pub confidence: f64,
}

/// Failures of the remote classification call.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("decode: {0}")]
    Decode(String),
}

/// Remote capability that looks at an image and answers a natural-language instruction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClassificationService: Send + Sync {
    /// Returns the raw reply text. Expected to contain a JSON object, but not guaranteed to.
    async fn submit(&self, frame: &Frame, prompt: &str) -> Result<String, ServiceError>;
}

pub struct Classifier {
    service: Arc<dyn ClassificationService>,
}

impl Classifier {
    pub fn new(service: Arc<dyn ClassificationService>) -> Self {
        Self { service }
    }

    /// Never fails: service errors become a zero-confidence negative verdict so the cycle still
    /// gets logged.
    pub async fn classify(
        &self,
        frame: &Frame,
        task_description: &str,
        is_idle: bool,
        similarity: f64,
    ) -> Verdict {
        if is_idle {
            debug!("Screen unchanged, skipping remote classification");
            return idle_verdict(similarity);
        }

        let prompt = build_prompt(task_description);
        match self.service.submit(frame, &prompt).await {
            Ok(reply) => {
                debug!("Classification reply {reply:?}");
                parse::parse_reply(&reply)
            }
            Err(e) => {
                warn!("Classification service failed {e:?}");
                Verdict {
                    on_task: false,
                    rationale: format!("Error: {e}"),
                    confidence: 0.0,
                }
            }
        }
    }
}

pub fn idle_verdict(similarity: f64) -> Verdict {
    Verdict {
        on_task: false,
        rationale: format!(
            "Screen unchanged (similarity: {:.2}%). User appears inactive.",
            similarity * 100.0
        ),
        confidence: IDLE_CONFIDENCE,
    }
}

pub fn build_prompt(task_description: &str) -> String {
    format!(
        r#"You are analyzing a screenshot to determine if the user is focused on their stated task.

Current Task: "{task_description}"

Please analyze the screenshot and determine:
1. Is the user working on the stated task? (yes/no)
2. What are they actually doing based on what you see?
3. How confident are you in this assessment? (0.0 to 1.0)

Respond in JSON format:
{{
    "is_on_task": true/false,
    "what_user_is_doing": "brief description",
    "confidence": 0.0-1.0,
    "reasoning": "brief explanation"
}}

Be generous in your interpretation - if the activity could plausibly relate to the task, consider it on-task.
For example, if task is "writing report" and they're researching online, that's on-task.
"#
    )
}
