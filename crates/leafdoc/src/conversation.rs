//! Follow-up conversation state and the timed `ask` round trip.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::augment::{AugmentationAdapter, SYSTEM_INSTRUCTION};
use crate::context::{build_context, ContextBlock};
use crate::types::{ChatMessage, ChatRole, DiagnosisOutcome, LeafdocError, LeafdocResult};

/// Default cap on stored history messages.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Default timeout for one augmentation call.
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of most recent messages replayed into each prompt.
const PROMPT_HISTORY_WINDOW: usize = 6;

/// A diagnosis plus the follow-up turns exchanged about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub outcome: DiagnosisOutcome,
    pub history: Vec<ChatMessage>,
    pub max_history: usize,
}

impl ConversationContext {
    pub fn new(outcome: DiagnosisOutcome) -> Self {
        Self::with_max_history(outcome, DEFAULT_MAX_HISTORY)
    }

    /// `max_history` is raised to 2 so a full exchange always fits.
    pub fn with_max_history(outcome: DiagnosisOutcome, max_history: usize) -> Self {
        Self {
            outcome,
            history: Vec::new(),
            max_history: max_history.max(2),
        }
    }

    pub fn context_block(&self) -> ContextBlock {
        build_context(&self.outcome)
    }

    /// Append a completed question/answer pair, dropping the oldest turns past the cap.
    fn push_exchange(&mut self, question: &str, answer: &str) {
        self.history.push(ChatMessage {
            role: ChatRole::User,
            content: question.to_string(),
        });
        self.history.push(ChatMessage {
            role: ChatRole::Assistant,
            content: answer.to_string(),
        });
        let cap = history_cap(self.max_history);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Messages actually kept: at least one exchange, and always whole exchanges.
fn history_cap(max_history: usize) -> usize {
    max_history.max(2) & !1
}

/// Compose the context string handed to the adapter.
pub fn build_prompt_context(block: &ContextBlock, history: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    prompt.push_str(SYSTEM_INSTRUCTION);
    prompt.push_str("\n\n<DIAGNOSIS_CONTEXT>\n");
    prompt.push_str(&block.text);
    prompt.push_str("\n</DIAGNOSIS_CONTEXT>\n");

    let start = history.len().saturating_sub(PROMPT_HISTORY_WINDOW);
    let recent = &history[start..];
    if !recent.is_empty() {
        prompt.push_str("\n<CONVERSATION_HISTORY>\n");
        for msg in recent {
            prompt.push_str(&format!("{}: {}\n", msg.role.as_str(), msg.content));
        }
        prompt.push_str("</CONVERSATION_HISTORY>\n");
    }

    prompt
}

/// Ask a follow-up question about a diagnosis.
///
/// The call runs under `timeout`. History is only extended after a
/// successful answer; on any error `conversation` is left untouched.
pub async fn ask<A>(
    adapter: &A,
    conversation: &mut ConversationContext,
    question: &str,
    timeout: Duration,
) -> LeafdocResult<String>
where
    A: AugmentationAdapter + ?Sized,
{
    let question = question.trim();
    if question.is_empty() {
        return Err(LeafdocError::InvalidInput("Question is empty".to_string()));
    }

    let block = conversation.context_block();
    let context = build_prompt_context(&block, &conversation.history);

    let answer = match tokio::time::timeout(timeout, adapter.generate_response(question, &context)).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            tracing::warn!("Follow-up question failed: {e}");
            return Err(e);
        }
        Err(_) => {
            tracing::warn!("Follow-up question timed out after {timeout:?}");
            return Err(LeafdocError::Timeout(timeout));
        }
    };

    conversation.push_exchange(question, &answer);
    Ok(answer)
}
