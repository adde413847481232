//! MCP toolset exposed to the workflow stages
//!
//! Four capabilities backed by HTTP adapters: list investable agents, read
//! holdings, execute a purchase, send a Telegram message. The buy tool
//! revalidates the requested amount against the current cycle's wallet
//! guard before touching the platform.

use claude_agent_sdk_rs::tool;
use claude_agent_sdk_rs::types::mcp::{
    create_sdk_mcp_server, McpServerConfig, McpServers, SdkMcpTool, ToolResult, ToolResultContent,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AtpConfig, InvestmentConfig, TelegramConfig};
use crate::error::{BotError, Result};
use crate::wallet::{self, WalletSnapshot};

pub const MCP_SERVER_NAME: &str = "atp-invest";

pub const TOOL_GET_AGENTS: &str = "atp_get_agents";
pub const TOOL_GET_HOLDINGS: &str = "atp_get_holdings";
pub const TOOL_BUY_AGENT: &str = "atp_buy_agent";
pub const TOOL_SEND_MESSAGE: &str = "telegram_send_message";

/// Every tool the toolset can serve. Stage allow-lists are checked against
/// this at engine construction time.
pub const ALL_TOOL_NAMES: [&str; 4] = [
    TOOL_GET_AGENTS,
    TOOL_GET_HOLDINGS,
    TOOL_BUY_AGENT,
    TOOL_SEND_MESSAGE,
];

/// ATP platform REST client
pub struct AtpClient {
    client: reqwest::Client,
    base_url: String,
    agent_router_address: Option<String>,
}

impl AtpClient {
    pub fn new(cfg: &AtpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            agent_router_address: cfg.agent_router_address.clone(),
        }
    }

    /// Investable agents sorted by market capitalization
    pub async fn top_agents(&self, limit: usize) -> Result<serde_json::Value> {
        let url = format!("{}/agents?sort=mcap&limit={limit}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Current agent-token holdings for an address
    pub async fn holdings(&self, address: &str) -> Result<serde_json::Value> {
        let url = format!("{}/holdings?address={address}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Execute a purchase; returns the transaction hash on success
    pub async fn buy_agent(&self, agent_address: &str, amount: Decimal) -> Result<String> {
        let url = format!("{}/agents/{agent_address}/buy", self.base_url);
        let mut body = json!({ "amount": amount.to_string() });
        if let Some(router) = &self.agent_router_address {
            body["agent_router_address"] = json!(router);
        }

        let response: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .get("transaction_hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BotError::Tool {
                kind: "atp".to_string(),
                message: response
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("purchase returned no transaction hash")
                    .to_string(),
            })
    }
}

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(cfg: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: cfg.bot_token.clone(),
            chat_id: cfg.chat_id.clone(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Long-poll inbound updates starting at `offset`. Returns the raw
    /// Bot API response; the caller decides which updates matter.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u32) -> Result<serde_json::Value> {
        let url = format!("https://api.telegram.org/bot{}/getUpdates", self.bot_token);
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });

        let response: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(response)
        } else {
            Err(BotError::Tool {
                kind: "telegram".to_string(),
                message: response
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("getUpdates rejected")
                    .to_string(),
            })
        }
    }

    /// Send a text message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({ "chat_id": self.chat_id, "text": text });

        let response: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            debug!("Telegram message delivered");
            Ok(())
        } else {
            Err(BotError::Tool {
                kind: "telegram".to_string(),
                message: response
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("sendMessage rejected")
                    .to_string(),
            })
        }
    }
}

/// Wallet limits in force for the current cycle; refreshed from each
/// snapshot before the workflow runs.
#[derive(Debug, Clone)]
struct CycleGuard {
    balance: Decimal,
}

/// The toolset handed to every stage execution. Connections are acquired
/// once at startup and live until shutdown.
pub struct Toolset {
    atp: Arc<AtpClient>,
    telegram: Arc<TelegramNotifier>,
    wallet_address: String,
    min_investment: Decimal,
    max_fraction: Decimal,
    guard: Arc<Mutex<Option<CycleGuard>>>,
}

impl Toolset {
    pub fn new(
        atp: AtpClient,
        telegram: TelegramNotifier,
        wallet_address: String,
        investment: &InvestmentConfig,
    ) -> Self {
        Self {
            atp: Arc::new(atp),
            telegram: Arc::new(telegram),
            wallet_address,
            min_investment: investment.min_investment,
            max_fraction: investment.fraction,
            guard: Arc::new(Mutex::new(None)),
        }
    }

    /// Arm the buy guard with this cycle's wallet snapshot
    pub async fn arm_cycle_guard(&self, snapshot: &WalletSnapshot) {
        *self.guard.lock().await = Some(CycleGuard {
            balance: snapshot.balance,
        });
    }

    pub fn telegram(&self) -> Arc<TelegramNotifier> {
        Arc::clone(&self.telegram)
    }

    /// MCP server map for a stage execution. Tools are rebuilt per call;
    /// the underlying adapters are shared.
    pub fn mcp_servers(&self) -> McpServers {
        let server = create_sdk_mcp_server(MCP_SERVER_NAME, "1.0.0", self.build_tools());
        let mut map = HashMap::new();
        map.insert(MCP_SERVER_NAME.to_string(), McpServerConfig::Sdk(server));
        McpServers::Dict(map)
    }

    fn build_tools(&self) -> Vec<SdkMcpTool> {
        vec![
            build_get_agents_tool(Arc::clone(&self.atp)),
            build_get_holdings_tool(Arc::clone(&self.atp), self.wallet_address.clone()),
            build_buy_tool(
                Arc::clone(&self.atp),
                Arc::clone(&self.guard),
                self.min_investment,
                self.max_fraction,
            ),
            build_send_message_tool(Arc::clone(&self.telegram)),
        ]
    }
}

fn text_result(text: String) -> ToolResult {
    ToolResult {
        content: vec![ToolResultContent::Text { text }],
        is_error: false,
    }
}

fn error_result(text: String) -> ToolResult {
    ToolResult {
        content: vec![ToolResultContent::Text { text }],
        is_error: true,
    }
}

// ── MCP Tool builders ────────────────────────────────────────────────

fn build_get_agents_tool(atp: Arc<AtpClient>) -> SdkMcpTool {
    tool!(
        TOOL_GET_AGENTS,
        "List investable ATP agents sorted by market capitalization (top 15).",
        json!({"type":"object","properties":{}}),
        move |_args: serde_json::Value| {
            let atp = Arc::clone(&atp);
            async move {
                let agents = atp.top_agents(15).await?;
                Ok(text_result(serde_json::to_string_pretty(&agents)?))
            }
        }
    )
}

fn build_get_holdings_tool(atp: Arc<AtpClient>, wallet_address: String) -> SdkMcpTool {
    tool!(
        TOOL_GET_HOLDINGS,
        "Return the current agent-token holdings of the investing wallet.",
        json!({"type":"object","properties":{}}),
        move |_args: serde_json::Value| {
            let atp = Arc::clone(&atp);
            let address = wallet_address.clone();
            async move {
                let holdings = atp.holdings(&address).await?;
                Ok(text_result(serde_json::to_string_pretty(&holdings)?))
            }
        }
    )
}

fn build_buy_tool(
    atp: Arc<AtpClient>,
    guard: Arc<Mutex<Option<CycleGuard>>>,
    min_investment: Decimal,
    max_fraction: Decimal,
) -> SdkMcpTool {
    tool!(
        TOOL_BUY_AGENT,
        "Buy agent tokens for the given IQ amount. Rejected unless the amount \
         passes the wallet safety checks for the current cycle.",
        json!({"type":"object","properties":{
            "agent_name":{"type":"string"},
            "agent_address":{"type":"string"},
            "amount":{"type":"string","description":"IQ amount, e.g. \"100.00\""}
        },"required":["agent_name","agent_address","amount"]}),
        move |args: serde_json::Value| {
            let atp = Arc::clone(&atp);
            let guard = Arc::clone(&guard);
            async move {
                let agent_name = args["agent_name"].as_str().unwrap_or_default().to_string();
                let agent_address = args["agent_address"].as_str().unwrap_or_default().to_string();
                let amount = match wallet::parse_amount(args["amount"].as_str().unwrap_or_default())
                {
                    Ok(a) => a,
                    Err(e) => return Ok(error_result(format!("invalid amount: {e}"))),
                };

                let balance = {
                    let g = guard.lock().await;
                    match g.as_ref() {
                        Some(g) => g.balance,
                        None => {
                            return Ok(error_result(
                                "no wallet snapshot for this cycle; purchase refused".to_string(),
                            ))
                        }
                    }
                };

                let validation =
                    wallet::validate_investment(balance, amount, min_investment, max_fraction);
                if !validation.is_valid {
                    warn!(
                        agent = %agent_name,
                        amount = %amount,
                        "buy refused: {}",
                        validation.error.as_deref().unwrap_or("invalid")
                    );
                    return Ok(error_result(format!(
                        "purchase refused: {}",
                        validation.error.unwrap_or_else(|| "validation failed".to_string())
                    )));
                }

                match atp.buy_agent(&agent_address, amount).await {
                    Ok(tx_hash) => {
                        info!(agent = %agent_name, amount = %amount, tx = %tx_hash, "purchase executed");
                        Ok(text_result(serde_json::to_string_pretty(&json!({
                            "success": true,
                            "agent_name": agent_name,
                            "agent_address": agent_address,
                            "amount": amount.to_string(),
                            "transaction_hash": tx_hash,
                        }))?))
                    }
                    Err(e) => Ok(error_result(serde_json::to_string_pretty(&json!({
                        "success": false,
                        "agent_name": agent_name,
                        "agent_address": agent_address,
                        "amount": amount.to_string(),
                        "error": e.to_string(),
                    }))?)),
                }
            }
        }
    )
}

fn build_send_message_tool(telegram: Arc<TelegramNotifier>) -> SdkMcpTool {
    tool!(
        TOOL_SEND_MESSAGE,
        "Send a text message to the configured Telegram chat.",
        json!({"type":"object","properties":{
            "text":{"type":"string"}
        },"required":["text"]}),
        move |args: serde_json::Value| {
            let telegram = Arc::clone(&telegram);
            async move {
                let text = args["text"].as_str().unwrap_or_default().to_string();
                if text.is_empty() {
                    return Ok(error_result("empty message text".to_string()));
                }
                telegram.send_message(&text).await?;
                Ok(text_result("message sent".to_string()))
            }
        }
    )
}
