//! Application and cycle context
//!
//! The application context is created once at startup and passed by
//! reference into the scheduler, replacing module-level singletons. The
//! cycle context is created fresh at every tick and discarded with it.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::history::{HistoryLog, InvestmentRecord};
use crate::toolset::Toolset;
use crate::wallet::{WalletService, WalletSnapshot};

/// How many prior outcomes are surfaced to the decision stage
const RECENT_RUNS_IN_CONTEXT: usize = 3;

/// Long-lived process state: created at startup, torn down at shutdown
pub struct AppContext {
    pub wallet: WalletService,
    pub toolset: Arc<Toolset>,
    pub history: Mutex<HistoryLog>,
}

impl AppContext {
    pub fn new(wallet: WalletService, toolset: Arc<Toolset>, history_capacity: usize) -> Self {
        Self {
            wallet,
            toolset,
            history: Mutex::new(HistoryLog::new(history_capacity)),
        }
    }

    /// Record a cycle outcome for future decision bias
    pub async fn record_outcome(&self, record: InvestmentRecord) {
        self.history.lock().await.append(record);
    }

    /// Summaries of the most recent outcomes, oldest first
    pub async fn recent_summaries(&self) -> Vec<String> {
        self.history
            .lock()
            .await
            .recent(RECENT_RUNS_IN_CONTEXT)
            .iter()
            .map(|r| r.summary())
            .collect()
    }
}

/// Transient execution context for one workflow traversal
pub struct CycleContext {
    pub wallet: WalletSnapshot,
    pub previous_runs: Vec<String>,
    stage_outputs: Vec<(String, String)>,
    pub record: Option<InvestmentRecord>,
}

impl CycleContext {
    pub fn new(wallet: WalletSnapshot, previous_runs: Vec<String>) -> Self {
        Self {
            wallet,
            previous_runs,
            stage_outputs: Vec::new(),
            record: None,
        }
    }

    /// Wallet and history block prepended to every stage prompt
    pub fn prompt_context(&self) -> String {
        let previous = if self.previous_runs.is_empty() {
            String::new()
        } else {
            format!("Previous runs: {}\n---\n", self.previous_runs.join(", "))
        };

        format!(
            "Context:\n{previous}\nWallet:\nAddress: {}\nIQ Balance: {}\nBudget: {}\n",
            self.wallet.address, self.wallet.balance, self.wallet.investment_amount
        )
    }

    pub fn push_output(&mut self, stage: &str, text: String) {
        self.stage_outputs.push((stage.to_string(), text));
    }

    pub fn output_of(&self, stage: &str) -> Option<&str> {
        self.stage_outputs
            .iter()
            .rev()
            .find(|(name, _)| name == stage)
            .map(|(_, text)| text.as_str())
    }

    pub fn last_output(&self) -> Option<&str> {
        self.stage_outputs.last().map(|(_, text)| text.as_str())
    }

    /// Accumulated prior stage outputs, in execution order
    pub fn prior_outputs_text(&self) -> String {
        self.stage_outputs
            .iter()
            .map(|(name, text)| format!("## {name}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn stages_run(&self) -> Vec<&str> {
        self.stage_outputs.iter().map(|(name, _)| name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> WalletSnapshot {
        WalletSnapshot {
            address: "0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
            balance: dec!(1000.00),
            investment_amount: dec!(100.00),
            formatted_balance: "1.00K IQ".to_string(),
            formatted_investment: "100.00 IQ".to_string(),
        }
    }

    #[test]
    fn prompt_context_includes_wallet_and_history() {
        let ctx = CycleContext::new(
            snapshot(),
            vec!["SUCCESS Sophia (10.00 IQ)".to_string()],
        );
        let text = ctx.prompt_context();

        assert!(text.contains("Previous runs: SUCCESS Sophia (10.00 IQ)"));
        assert!(text.contains("Address: 0x742d35cc6634c0532925a3b844bc454e4438f44e"));
        assert!(text.contains("IQ Balance: 1000.00"));
        assert!(text.contains("Budget: 100.00"));
    }

    #[test]
    fn prompt_context_omits_empty_history() {
        let ctx = CycleContext::new(snapshot(), vec![]);
        assert!(!ctx.prompt_context().contains("Previous runs"));
    }

    #[test]
    fn stage_outputs_accumulate_in_order() {
        let mut ctx = CycleContext::new(snapshot(), vec![]);
        ctx.push_output("portfolio_analysis", "holdings: none".to_string());
        ctx.push_output("agent_discovery", "top agents: ...".to_string());

        assert_eq!(ctx.output_of("portfolio_analysis"), Some("holdings: none"));
        assert_eq!(ctx.last_output(), Some("top agents: ..."));
        assert_eq!(
            ctx.stages_run(),
            vec!["portfolio_analysis", "agent_discovery"]
        );
        let all = ctx.prior_outputs_text();
        assert!(all.contains("## portfolio_analysis"));
        assert!(all.contains("## agent_discovery"));
    }
}
