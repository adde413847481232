//! Claude agent backend for workflow stages
//!
//! One stage execution is one client session: connect, query, stream the
//! response, disconnect. The toolset is exposed through an in-process MCP
//! server and each stage only sees its allow-listed tools.

use async_trait::async_trait;
use claude_agent_sdk_rs::types::config::{ClaudeAgentOptions, PermissionMode, SystemPrompt};
use claude_agent_sdk_rs::{ClaudeClient, ContentBlock, Message};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use crate::toolset::Toolset;

/// One prompt-driven unit of work handed to the backend
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage_name: String,
    pub system_prompt: String,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
}

/// Backend abstraction so the engine and stages can be tested without a
/// live model.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn run_stage(&self, request: &StageRequest) -> Result<String>;
}

/// Claude SDK stage runner with MCP tools
pub struct ClaudeStageRunner {
    toolset: Arc<Toolset>,
    model: Option<String>,
    max_retries: u8,
    retry_backoff: Duration,
}

impl ClaudeStageRunner {
    pub fn new(toolset: Arc<Toolset>, model: Option<String>) -> Self {
        Self {
            toolset,
            model,
            max_retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }

    async fn execute_once(&self, request: &StageRequest) -> Result<String> {
        let mut options = ClaudeAgentOptions::builder()
            .system_prompt(SystemPrompt::Text(request.system_prompt.clone()))
            .permission_mode(PermissionMode::BypassPermissions)
            .allowed_tools(request.allowed_tools.clone())
            .mcp_servers(self.toolset.mcp_servers())
            .max_turns(request.max_turns)
            .continue_conversation(false)
            .build();

        if let Some(model) = &self.model {
            options.model = Some(model.clone());
        }

        let mut client = ClaudeClient::new(options);
        client
            .connect()
            .await
            .map_err(|e| BotError::Agent(format!("claude-agent connect failed: {e}")))?;

        client
            .query(&request.prompt)
            .await
            .map_err(|e| BotError::Agent(format!("claude-agent query failed: {e}")))?;

        let mut output = String::new();
        let mut stream = client.receive_response();
        while let Some(item) = stream.next().await {
            match item.map_err(|e| BotError::Agent(format!("claude-agent stream error: {e}")))? {
                Message::Assistant(msg) => {
                    for block in msg.message.content {
                        if let ContentBlock::Text(t) = block {
                            debug!(stage = %request.stage_name, "[Claude] {}", t.text);
                            if !output.is_empty() {
                                output.push('\n');
                            }
                            output.push_str(&t.text);
                        }
                    }
                }
                Message::Result(r) => {
                    if output.is_empty() {
                        if let Some(result) = r.result {
                            output = result;
                        }
                    }
                    break;
                }
                _ => {}
            }
        }

        drop(stream);
        client
            .disconnect()
            .await
            .map_err(|e| BotError::Agent(format!("claude-agent disconnect failed: {e}")))?;

        if output.is_empty() {
            return Err(BotError::Agent(format!(
                "stage {} produced no output",
                request.stage_name
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl LlmBackend for ClaudeStageRunner {
    async fn run_stage(&self, request: &StageRequest) -> Result<String> {
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            attempts += 1;

            match self.execute_once(request).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(
                        stage = %request.stage_name,
                        "stage attempt {attempts} failed: {e}"
                    );
                    last_error = Some(e);

                    if attempts < self.max_retries {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| BotError::Agent("stage failed with unknown error".to_string())))
    }
}
