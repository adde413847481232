//! The five concrete workflow stages
//!
//! Each stage wraps its prompt instructions and runs one pass against the
//! agent backend with its own tool allow-list and call budget. The
//! executor stage is the only one that produces a typed investment record;
//! it parses the structured JSON block the prompt demands.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::context::CycleContext;
use crate::error::Result;
use crate::history::InvestmentRecord;
use crate::llm::{LlmBackend, StageRequest};
use crate::notify;
use crate::toolset::{TOOL_BUY_AGENT, TOOL_GET_AGENTS, TOOL_GET_HOLDINGS, TOOL_SEND_MESSAGE};

use super::stage::{Stage, StageExec, StageOutput, StageSpec};

pub const STAGE_PORTFOLIO_ANALYSIS: &str = "portfolio_analysis";
pub const STAGE_AGENT_DISCOVERY: &str = "agent_discovery";
pub const STAGE_INVESTMENT_DECISION: &str = "investment_decision";
pub const STAGE_INVESTMENT_EXECUTOR: &str = "investment_executor";
pub const STAGE_TELEGRAM_NOTIFIER: &str = "telegram_notifier";

pub const SENTINEL_PORTFOLIO_ANALYSIS: &str = "PORTFOLIO_ANALYSIS_COMPLETE";
pub const SENTINEL_AGENT_DISCOVERY: &str = "AGENT_DISCOVERY_COMPLETE";
pub const SENTINEL_INVESTMENT_DECISION: &str = "INVESTMENT_DECISION_READY";
pub const SENTINEL_INVESTMENT_EXECUTION: &str = "INVESTMENT_EXECUTION_COMPLETE";

const SYSTEM_PROMPT: &str = "You are one specialist in an autonomous ATP \
investment workflow that buys tokenized agents on IQAI's Agent Tokenization \
Platform with a fixed IQ budget. Follow your stage instructions exactly, \
use only the tools you are given, and always end your response with the \
completion token your instructions name.";

/// Build the backend request for a stage. The allow-list and turn budget
/// come from the spec the engine validated; stages never restate them.
fn request(spec: &StageSpec, instructions: String, ctx: &CycleContext) -> StageRequest {
    let prior = ctx.prior_outputs_text();
    let prompt = if prior.is_empty() {
        format!("{}\n{instructions}", ctx.prompt_context())
    } else {
        format!(
            "{}\n# Previous stage outputs\n\n{prior}\n\n# Your task\n\n{instructions}",
            ctx.prompt_context()
        )
    };

    StageRequest {
        stage_name: spec.name.to_string(),
        system_prompt: SYSTEM_PROMPT.to_string(),
        prompt,
        allowed_tools: spec.allowed_tools.iter().map(|t| t.to_string()).collect(),
        max_turns: spec.tool_budget,
    }
}

/// Analyzes current holdings and the wallet budget
pub struct PortfolioAnalysisStage {
    backend: Arc<dyn LlmBackend>,
}

#[async_trait]
impl StageExec for PortfolioAnalysisStage {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput> {
        let instructions = format!(
            "Analyze the current portfolio. Call {TOOL_GET_HOLDINGS} once and \
             report its response together with the wallet figures from the \
             context.\n\n\
             ONLY output the following fields in this exact format:\n\n\
             📊 PORTFOLIO ANALYSIS\n\n\
             Wallet Balance: {} IQ\n\
             Investment Amount: {} IQ\n\
             Current Holdings: [tool response here]\n\n\
             {SENTINEL_PORTFOLIO_ANALYSIS}",
            ctx.wallet.balance, ctx.wallet.investment_amount
        );
        let req = request(spec, instructions, ctx);
        let text = self.backend.run_stage(&req).await?;
        Ok(StageOutput::text_only(text))
    }
}

/// Discovers top agents on the platform by market cap
pub struct AgentDiscoveryStage {
    backend: Arc<dyn LlmBackend>,
}

#[async_trait]
impl StageExec for AgentDiscoveryStage {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput> {
        let instructions = format!(
            "Discover investable agents. Call {TOOL_GET_AGENTS} and return its \
             response, keeping the top 10 by market cap.\n\n\
             ONLY output the tool response followed by the completion token:\n\n\
             [tool response here]\n\n\
             {SENTINEL_AGENT_DISCOVERY}"
        );
        let req = request(spec, instructions, ctx);
        let text = self.backend.run_stage(&req).await?;
        Ok(StageOutput::text_only(text))
    }
}

/// Picks one agent and amount from the analysis and discovery outputs
pub struct InvestmentDecisionStage {
    backend: Arc<dyn LlmBackend>,
}

#[async_trait]
impl StageExec for InvestmentDecisionStage {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput> {
        let instructions = format!(
            "Make the final investment decision from the portfolio analysis and \
             agent discovery outputs above. The full budget for this cycle is \
             {} IQ.\n\
             Prefer the top agents by market cap, lower token price and higher \
             holder count. The previous runs listed in the context contain both \
             successful and failed purchases: avoid buying the same agent twice \
             in a row and avoid agents that failed in previous runs. Try to \
             diversify.\n\n\
             ONLY output the following fields in this exact format:\n\n\
             🎯 INVESTMENT DECISION\n\n\
             Selected Agent: [Agent Name]\n\
             Contract Address: [Contract Address]\n\
             Investment Amount: [Exact amount] IQ\n\
             Reason: [Brief 1-2 sentence justification]\n\n\
             {SENTINEL_INVESTMENT_DECISION}",
            ctx.wallet.investment_amount
        );
        let req = request(spec, instructions, ctx);
        let text = self.backend.run_stage(&req).await?;
        Ok(StageOutput::text_only(text))
    }
}

/// Executes the purchase and emits the typed investment record
pub struct InvestmentExecutorStage {
    backend: Arc<dyn LlmBackend>,
}

/// Shape of the JSON block the executor prompt demands
#[derive(Debug, Deserialize)]
struct RawInvestmentResult {
    success: bool,
    agent_name: String,
    #[serde(default)]
    agent_address: String,
    amount: String,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reasoning: String,
}

#[async_trait]
impl StageExec for InvestmentExecutorStage {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput> {
        let instructions = format!(
            "Execute the investment decision above by calling {TOOL_BUY_AGENT} \
             with the selected agent's address and the decided amount. Do not \
             invent transaction hashes; report exactly what the tool returns. \
             If the purchase fails, report the failure honestly.\n\n\
             After the tool call, output a single JSON object in a ```json \
             code block with these fields and nothing else around it:\n\
             {{\n\
               \"success\": true/false,\n\
               \"agent_name\": \"name of the agent\",\n\
               \"agent_address\": \"contract address\",\n\
               \"amount\": \"amount in IQ, e.g. \\\"100.00 IQ\\\"\",\n\
               \"transaction_hash\": \"hash if successful\",\n\
               \"error\": \"error message if failed\",\n\
               \"reasoning\": \"brief explanation of the decision\"\n\
             }}\n\n\
             Then end with the completion token:\n\n\
             {SENTINEL_INVESTMENT_EXECUTION}"
        );
        let req = request(spec, instructions, ctx);
        let text = self.backend.run_stage(&req).await?;

        let record = match parse_investment_result(&text) {
            Some(record) => record,
            None => {
                warn!("executor output had no parseable result block");
                InvestmentRecord::failed_cycle(
                    format!("{} IQ", ctx.wallet.investment_amount),
                    "executor produced no structured result",
                )
            }
        };

        Ok(StageOutput {
            text,
            record: Some(record),
        })
    }
}

/// Sends the cycle outcome to the Telegram chat
pub struct TelegramNotifierStage {
    backend: Arc<dyn LlmBackend>,
}

#[async_trait]
impl StageExec for TelegramNotifierStage {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput> {
        let message = match &ctx.record {
            Some(record) => notify::render_outcome(record),
            None => {
                warn!("notifier running without an investment record");
                notify::render_outcome(&InvestmentRecord::failed_cycle(
                    format!("{} IQ", ctx.wallet.investment_amount),
                    "workflow produced no execution result",
                ))
            }
        };

        let instructions = format!(
            "Send the investment outcome to the user. Call {TOOL_SEND_MESSAGE} \
             exactly once with the following text, byte for byte, as the \
             `text` argument. Do not reword it, do not add placeholders.\n\n\
             ---\n{message}\n---\n\n\
             Then confirm delivery in one short sentence."
        );
        let req = request(spec, instructions, ctx);
        let text = self.backend.run_stage(&req).await?;
        Ok(StageOutput::text_only(text))
    }
}

/// Extract a JSON object from output that may wrap it in code fences
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

fn parse_investment_result(text: &str) -> Option<InvestmentRecord> {
    let raw: RawInvestmentResult = serde_json::from_str(extract_json(text)).ok()?;

    // Empty strings from the model mean "absent"
    let clean = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    Some(InvestmentRecord {
        agent_name: raw.agent_name,
        agent_address: raw.agent_address,
        amount: raw.amount,
        success: raw.success,
        transaction_hash: clean(raw.transaction_hash),
        error: clean(raw.error),
        reasoning: raw.reasoning,
        timestamp: Utc::now(),
    })
}

/// The static ATP investment stage graph: analysis → discovery → decision →
/// execution → notification.
pub fn investment_stages(backend: Arc<dyn LlmBackend>) -> Vec<Stage> {
    vec![
        Stage {
            spec: StageSpec {
                name: STAGE_PORTFOLIO_ANALYSIS,
                sentinel: Some(SENTINEL_PORTFOLIO_ANALYSIS),
                allowed_tools: &[TOOL_GET_HOLDINGS],
                tool_budget: 3,
                next: &[STAGE_AGENT_DISCOVERY],
            },
            exec: Box::new(PortfolioAnalysisStage {
                backend: Arc::clone(&backend),
            }),
        },
        Stage {
            spec: StageSpec {
                name: STAGE_AGENT_DISCOVERY,
                sentinel: Some(SENTINEL_AGENT_DISCOVERY),
                allowed_tools: &[TOOL_GET_AGENTS],
                tool_budget: 5,
                next: &[STAGE_INVESTMENT_DECISION],
            },
            exec: Box::new(AgentDiscoveryStage {
                backend: Arc::clone(&backend),
            }),
        },
        Stage {
            spec: StageSpec {
                name: STAGE_INVESTMENT_DECISION,
                sentinel: Some(SENTINEL_INVESTMENT_DECISION),
                allowed_tools: &[],
                tool_budget: 1,
                next: &[STAGE_INVESTMENT_EXECUTOR],
            },
            exec: Box::new(InvestmentDecisionStage {
                backend: Arc::clone(&backend),
            }),
        },
        Stage {
            spec: StageSpec {
                name: STAGE_INVESTMENT_EXECUTOR,
                sentinel: Some(SENTINEL_INVESTMENT_EXECUTION),
                allowed_tools: &[TOOL_BUY_AGENT],
                tool_budget: 2,
                next: &[STAGE_TELEGRAM_NOTIFIER],
            },
            exec: Box::new(InvestmentExecutorStage {
                backend: Arc::clone(&backend),
            }),
        },
        Stage {
            spec: StageSpec {
                name: STAGE_TELEGRAM_NOTIFIER,
                sentinel: None,
                allowed_tools: &[TOOL_SEND_MESSAGE],
                tool_budget: 2,
                next: &[],
            },
            exec: Box::new(TelegramNotifierStage { backend }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_code_block() {
        let text = "Purchase done.\n\n```json\n{\"success\": true, \"agent_name\": \"Sophia\"}\n```\n\nINVESTMENT_EXECUTION_COMPLETE";
        let json = extract_json(text);
        assert!(json.starts_with('{'));
        assert!(json.contains("Sophia"));
    }

    #[test]
    fn extract_json_raw_object() {
        let text = r#"{"success": false, "agent_name": "x"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn parse_result_success() {
        let text = r#"
```json
{
  "success": true,
  "agent_name": "Sophia",
  "agent_address": "0xabc",
  "amount": "100.00 IQ",
  "transaction_hash": "0xdeadbeef",
  "error": "",
  "reasoning": "top market cap"
}
```
INVESTMENT_EXECUTION_COMPLETE"#;

        let record = parse_investment_result(text).unwrap();
        assert!(record.success);
        assert_eq!(record.agent_name, "Sophia");
        assert_eq!(record.transaction_hash.as_deref(), Some("0xdeadbeef"));
        assert_eq!(record.error, None);
    }

    #[test]
    fn parse_result_failure_keeps_error() {
        let text = r#"{"success": false, "agent_name": "Sophia", "amount": "100.00 IQ", "error": "reverted", "reasoning": "chose top agent"}"#;
        let record = parse_investment_result(text).unwrap();
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("reverted"));
        assert_eq!(record.transaction_hash, None);
    }

    #[test]
    fn unparseable_output_yields_none() {
        assert!(parse_investment_result("no json here").is_none());
    }

    #[test]
    fn stage_graph_is_linear_and_complete() {
        struct Null;
        #[async_trait]
        impl LlmBackend for Null {
            async fn run_stage(&self, _r: &StageRequest) -> Result<String> {
                Ok(String::new())
            }
        }

        let stages = investment_stages(Arc::new(Null));
        assert_eq!(stages.len(), 5);
        assert_eq!(stages[0].spec.name, STAGE_PORTFOLIO_ANALYSIS);
        assert_eq!(stages[4].spec.next.len(), 0);
        // every non-terminal stage has exactly one successor and a sentinel
        for stage in &stages[..4] {
            assert_eq!(stage.spec.next.len(), 1);
            assert!(stage.spec.sentinel.is_some());
        }
    }
}
