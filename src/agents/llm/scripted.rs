//! Scripted provider for offline runs and tests
//!
//! Replies are consumed in order; once the script is empty the fallback reply
//! is used for every further call. Every request is recorded.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::agents::error::{LlmError, LlmResult};

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Answer with fixed text
    Text(String),
    /// Answer with `[model] <last user message>`
    Echo,
    /// Fail with an HTTP-style API error
    Error { status: u16, message: String },
    /// Fail with a transport error
    Unavailable(String),
    /// Wait, then produce the inner reply
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    pub fn delayed(delay: Duration, reply: ScriptedReply) -> Self {
        ScriptedReply::Delayed(delay, Box::new(reply))
    }
}

/// Provider whose answers are fixed in advance
pub struct ScriptedProvider {
    model: String,
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Echo every request back
    pub fn echo(model: &str) -> Self {
        Self::always(model, ScriptedReply::Echo)
    }

    /// Answer every request with the same reply
    pub fn always(model: &str, reply: ScriptedReply) -> Self {
        Self {
            model: if model.is_empty() {
                "echo".to_string()
            } else {
                model.to_string()
            },
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Play `replies` in order, then fall back to echoing
    pub fn scripted(model: &str, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let provider = Self::echo(model);
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..provider
        }
    }

    /// Requests received so far, in call order
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn play(&self, reply: ScriptedReply, request: &CompletionRequest) -> LlmResult<String> {
        let mut reply = reply;
        loop {
            match reply {
                ScriptedReply::Text(text) => return Ok(text),
                ScriptedReply::Echo => {
                    let last = request.last_user_message().unwrap_or_default();
                    return Ok(format!("[{}] {}", self.model, last));
                }
                ScriptedReply::Error { status, message } => {
                    return Err(LlmError::Api { status, message })
                }
                ScriptedReply::Unavailable(message) => return Err(LlmError::Unavailable(message)),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.requests.lock().await.push(request.clone());
        let reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let content = self.play(reply, &request).await?;
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: None,
        })
    }
}
