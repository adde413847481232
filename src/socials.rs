//! Interactive Telegram chat agent
//!
//! Long-polls the Bot API for messages in the configured chat and answers
//! them through the agent backend with the read-only ATP tools. Runs as
//! its own task next to the scheduler and stops on the same shutdown
//! signal. Purchases stay exclusive to the scheduled cycle: the buy and
//! notification tools are never in this agent's allow-list.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::llm::{LlmBackend, StageRequest};
use crate::toolset::{TelegramNotifier, TOOL_GET_AGENTS, TOOL_GET_HOLDINGS};

const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
const CHAT_MAX_TURNS: u32 = 5;

const CHAT_SYSTEM_PROMPT: &str = "You are the chat assistant of an \
autonomous ATP investment bot. Answer questions about the portfolio, \
investable agents and recent activity using the tools you are given. Be \
concise. You cannot buy, sell or transfer anything; purchases only happen \
through the scheduled investment cycle, say so when asked.";

/// One inbound chat message worth answering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub update_id: i64,
    pub text: String,
}

/// Offset acknowledging every update in the response, matching or not
pub fn next_offset(response: &serde_json::Value, current: i64) -> i64 {
    response
        .get("result")
        .and_then(|v| v.as_array())
        .map(|updates| {
            updates
                .iter()
                .filter_map(|u| u.get("update_id").and_then(|v| v.as_i64()))
                .map(|id| id + 1)
                .fold(current, i64::max)
        })
        .unwrap_or(current)
}

/// Text messages from the configured chat; everything else is dropped
pub fn parse_updates(response: &serde_json::Value, chat_id: &str) -> Vec<InboundMessage> {
    let Some(updates) = response.get("result").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    updates
        .iter()
        .filter_map(|update| {
            let update_id = update.get("update_id")?.as_i64()?;
            let message = update.get("message")?;
            let from_chat = match message.get("chat")?.get("id")? {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                _ => return None,
            };
            if from_chat != chat_id {
                return None;
            }
            let text = message.get("text")?.as_str()?.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(InboundMessage { update_id, text })
        })
        .collect()
}

fn chat_request(text: &str) -> StageRequest {
    StageRequest {
        stage_name: "telegram_chat".to_string(),
        system_prompt: CHAT_SYSTEM_PROMPT.to_string(),
        prompt: text.to_string(),
        allowed_tools: vec![TOOL_GET_AGENTS.to_string(), TOOL_GET_HOLDINGS.to_string()],
        max_turns: CHAT_MAX_TURNS,
    }
}

/// The long-lived interactive agent
pub struct SocialsAgent {
    telegram: Arc<TelegramNotifier>,
    backend: Arc<dyn LlmBackend>,
}

impl SocialsAgent {
    pub fn new(telegram: Arc<TelegramNotifier>, backend: Arc<dyn LlmBackend>) -> Self {
        Self { telegram, backend }
    }

    /// Poll and answer until shutdown is signalled. A failed poll or reply
    /// never stops the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("interactive chat agent listening");
        let mut offset = 0i64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping chat agent");
                    return;
                }
                polled = self.telegram.get_updates(offset, POLL_TIMEOUT_SECS) => {
                    match polled {
                        Ok(response) => {
                            offset = next_offset(&response, offset);
                            for message in parse_updates(&response, self.telegram.chat_id()) {
                                debug!(update = message.update_id, "inbound chat message");
                                if let Err(e) = self.answer(&message).await {
                                    warn!("chat reply failed: {e}");
                                }
                            }
                        }
                        Err(e) => {
                            warn!("update poll failed: {e}");
                            tokio::time::sleep(POLL_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    async fn answer(&self, message: &InboundMessage) -> Result<()> {
        let reply = self.backend.run_stage(&chat_request(&message.text)).await?;
        self.telegram.send_message(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn updates_response() -> serde_json::Value {
        json!({
            "ok": true,
            "result": [
                {
                    "update_id": 100,
                    "message": { "chat": { "id": -100123 }, "text": "how are my holdings?" }
                },
                {
                    "update_id": 101,
                    "message": { "chat": { "id": 555 }, "text": "wrong chat" }
                },
                {
                    "update_id": 102,
                    "message": { "chat": { "id": -100123 }, "sticker": {} }
                },
                {
                    "update_id": 103,
                    "message": { "chat": { "id": -100123 }, "text": "  top agents?  " }
                }
            ]
        })
    }

    #[test]
    fn only_text_from_the_configured_chat_is_kept() {
        let messages = parse_updates(&updates_response(), "-100123");
        assert_eq!(
            messages,
            vec![
                InboundMessage {
                    update_id: 100,
                    text: "how are my holdings?".to_string(),
                },
                InboundMessage {
                    update_id: 103,
                    text: "top agents?".to_string(),
                },
            ]
        );
    }

    #[test]
    fn offset_advances_past_every_update_including_foreign_chats() {
        assert_eq!(next_offset(&updates_response(), 0), 104);
        // nothing new keeps the cursor where it was
        assert_eq!(next_offset(&json!({"ok": true, "result": []}), 42), 42);
        assert_eq!(next_offset(&json!({"ok": true}), 7), 7);
    }

    #[test]
    fn chat_requests_only_expose_read_tools() {
        let request = chat_request("what do I hold?");
        assert_eq!(
            request.allowed_tools,
            vec![TOOL_GET_AGENTS.to_string(), TOOL_GET_HOLDINGS.to_string()]
        );
        assert!(!request
            .allowed_tools
            .iter()
            .any(|t| t.contains("buy") || t.contains("send_message")));
        assert_eq!(request.max_turns, CHAT_MAX_TURNS);
        assert_eq!(request.prompt, "what do I hold?");
    }
}
