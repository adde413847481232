//! Telegram notification templates
//!
//! These literal formats are consumed by humans in the chat channel and are
//! part of the external contract. Do not reword them.

use crate::history::InvestmentRecord;

/// Explorer base for transaction links
pub const EXPLORER_TX_BASE: &str = "https://fraxscan.com/tx/";

/// Render the outcome notification for a cycle
pub fn render_outcome(record: &InvestmentRecord) -> String {
    if record.success {
        render_success(record)
    } else {
        render_failure(record)
    }
}

fn render_success(record: &InvestmentRecord) -> String {
    format!(
        "🌟 ATP Agent Purchase Log\n\
         \n\
         ✅ Buy Transaction Successful\n\
         \n\
         🤖 Agent: {}\n\
         💰 Amount: {}\n\
         🔗 View on Explorer: {}{}\n\
         \n\
         💡 Reasoning: {}",
        record.agent_name,
        record.amount,
        EXPLORER_TX_BASE,
        record.transaction_hash.as_deref().unwrap_or("N/A"),
        record.reasoning,
    )
}

fn render_failure(record: &InvestmentRecord) -> String {
    format!(
        "😔 Investment workflow failed\n\
         \n\
         🤖 Agent: {}\n\
         💰 Amount: {}\n\
         ❌ Error: {}\n\
         \n\
         💡 Analysis: {}",
        record.agent_name,
        record.amount,
        record.error.as_deref().unwrap_or("unknown error"),
        record.reasoning,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn success_record() -> InvestmentRecord {
        InvestmentRecord {
            agent_name: "Sophia".to_string(),
            agent_address: "0xabc".to_string(),
            amount: "100.00 IQ".to_string(),
            success: true,
            transaction_hash: Some("0xdeadbeef".to_string()),
            error: None,
            reasoning: "Top market cap with strong holder base".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn success_template_is_exact() {
        let expected = "🌟 ATP Agent Purchase Log\n\
                        \n\
                        ✅ Buy Transaction Successful\n\
                        \n\
                        🤖 Agent: Sophia\n\
                        💰 Amount: 100.00 IQ\n\
                        🔗 View on Explorer: https://fraxscan.com/tx/0xdeadbeef\n\
                        \n\
                        💡 Reasoning: Top market cap with strong holder base";
        assert_eq!(render_outcome(&success_record()), expected);
    }

    #[test]
    fn failure_template_is_exact() {
        let mut record = success_record();
        record.success = false;
        record.transaction_hash = None;
        record.error = Some("transaction reverted".to_string());

        let expected = "😔 Investment workflow failed\n\
                        \n\
                        🤖 Agent: Sophia\n\
                        💰 Amount: 100.00 IQ\n\
                        ❌ Error: transaction reverted\n\
                        \n\
                        💡 Analysis: Top market cap with strong holder base";
        assert_eq!(render_outcome(&record), expected);
    }
}
