//! End-to-end traversal of the investment stage graph against a scripted
//! agent backend. No network, no model: the backend answers per stage name
//! the way a cooperative (or misbehaving) model would.

use async_trait::async_trait;
use atp_investor::context::CycleContext;
use atp_investor::error::{BotError, Result};
use atp_investor::llm::{LlmBackend, StageRequest};
use atp_investor::toolset::ALL_TOOL_NAMES;
use atp_investor::wallet::WalletSnapshot;
use atp_investor::workflow::stages::{investment_stages, STAGE_PORTFOLIO_ANALYSIS};
use atp_investor::workflow::WorkflowEngine;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

const EXECUTOR_SUCCESS: &str = r#"Purchase submitted.

```json
{
  "success": true,
  "agent_name": "Sophia",
  "agent_address": "0x1234567890abcdef1234567890abcdef12345678",
  "amount": "100.00 IQ",
  "transaction_hash": "0xfeedface",
  "error": "",
  "reasoning": "highest market cap with growing holder count"
}
```

INVESTMENT_EXECUTION_COMPLETE"#;

/// Scripted backend: answers by stage name, default answers carry the
/// stage's completion token.
struct Scripted {
    overrides: HashMap<&'static str, &'static str>,
}

impl Scripted {
    fn cooperative() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    fn with_override(stage: &'static str, output: &'static str) -> Self {
        let mut overrides = HashMap::new();
        overrides.insert(stage, output);
        Self { overrides }
    }
}

#[async_trait]
impl LlmBackend for Scripted {
    async fn run_stage(&self, request: &StageRequest) -> Result<String> {
        if let Some(output) = self.overrides.get(request.stage_name.as_str()) {
            return Ok(output.to_string());
        }

        Ok(match request.stage_name.as_str() {
            "portfolio_analysis" => {
                "📊 PORTFOLIO ANALYSIS\n\nCurrent Holdings: none\n\nPORTFOLIO_ANALYSIS_COMPLETE"
                    .to_string()
            }
            "agent_discovery" => {
                "Top agents: Sophia, Aiden, Luna\n\nAGENT_DISCOVERY_COMPLETE".to_string()
            }
            "investment_decision" => {
                "🎯 INVESTMENT DECISION\n\nSelected Agent: Sophia\n\nINVESTMENT_DECISION_READY"
                    .to_string()
            }
            "investment_executor" => EXECUTOR_SUCCESS.to_string(),
            "telegram_notifier" => "Notification delivered.".to_string(),
            other => return Err(BotError::Agent(format!("unexpected stage {other}"))),
        })
    }
}

fn snapshot() -> WalletSnapshot {
    WalletSnapshot {
        address: "0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
        balance: dec!(1000.00),
        investment_amount: dec!(100.00),
        formatted_balance: "1.00K IQ".to_string(),
        formatted_investment: "100.00 IQ".to_string(),
    }
}

fn engine_with(backend: Arc<dyn LlmBackend>, max_steps: u32) -> WorkflowEngine {
    WorkflowEngine::new(
        investment_stages(backend),
        STAGE_PORTFOLIO_ANALYSIS,
        max_steps,
        &ALL_TOOL_NAMES,
    )
    .expect("stage graph should be valid")
}

#[tokio::test]
async fn cooperative_cycle_runs_all_five_stages() {
    let engine = engine_with(Arc::new(Scripted::cooperative()), 15);
    let mut ctx = CycleContext::new(snapshot(), vec![]);

    let outcome = engine.run(&mut ctx).await.unwrap();

    assert_eq!(
        outcome.stages_run,
        vec![
            "portfolio_analysis",
            "agent_discovery",
            "investment_decision",
            "investment_executor",
            "telegram_notifier",
        ]
    );
    assert_eq!(outcome.final_output, "Notification delivered.");

    let record = outcome.record.expect("executor should produce a record");
    assert!(record.success);
    assert_eq!(record.agent_name, "Sophia");
    assert_eq!(record.transaction_hash.as_deref(), Some("0xfeedface"));
}

#[tokio::test]
async fn missing_sentinel_still_reaches_the_notifier() {
    // Single-successor stages advance even when the model forgets its
    // completion token.
    let engine = engine_with(
        Arc::new(Scripted::with_override(
            "agent_discovery",
            "Top agents: Sophia, Aiden, Luna",
        )),
        15,
    );
    let mut ctx = CycleContext::new(snapshot(), vec![]);

    let outcome = engine.run(&mut ctx).await.unwrap();
    assert_eq!(outcome.stages_run.len(), 5);
    assert!(outcome.record.is_some());
}

#[tokio::test]
async fn unstructured_executor_output_records_a_failed_cycle() {
    let engine = engine_with(
        Arc::new(Scripted::with_override(
            "investment_executor",
            "I bought something, probably. INVESTMENT_EXECUTION_COMPLETE",
        )),
        15,
    );
    let mut ctx = CycleContext::new(snapshot(), vec![]);

    let outcome = engine.run(&mut ctx).await.unwrap();
    let record = outcome.record.expect("fallback record expected");
    assert!(!record.success);
    assert_eq!(record.transaction_hash, None);
    assert_eq!(record.amount, "100.00 IQ");
}

#[tokio::test]
async fn step_budget_smaller_than_the_graph_aborts() {
    let engine = engine_with(Arc::new(Scripted::cooperative()), 3);
    let mut ctx = CycleContext::new(snapshot(), vec![]);

    match engine.run(&mut ctx).await {
        Err(BotError::BudgetExhausted { steps, max }) => {
            assert_eq!(steps, 4);
            assert_eq!(max, 3);
        }
        other => panic!("expected budget exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_error_propagates_out_of_the_cycle() {
    struct Failing;

    #[async_trait]
    impl LlmBackend for Failing {
        async fn run_stage(&self, _request: &StageRequest) -> Result<String> {
            Err(BotError::Agent("model unavailable".to_string()))
        }
    }

    let engine = engine_with(Arc::new(Failing), 15);
    let mut ctx = CycleContext::new(snapshot(), vec![]);

    assert!(matches!(
        engine.run(&mut ctx).await,
        Err(BotError::Agent(_))
    ));
}

#[tokio::test]
async fn stage_requests_carry_their_declared_tools_and_budgets() {
    struct Recording {
        inner: Scripted,
        seen: std::sync::Mutex<Vec<(String, Vec<String>, u32)>>,
    }

    #[async_trait]
    impl LlmBackend for Recording {
        async fn run_stage(&self, request: &StageRequest) -> Result<String> {
            self.seen.lock().unwrap().push((
                request.stage_name.clone(),
                request.allowed_tools.clone(),
                request.max_turns,
            ));
            self.inner.run_stage(request).await
        }
    }

    let backend = Arc::new(Recording {
        inner: Scripted::cooperative(),
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let engine = engine_with(backend.clone(), 15);

    engine
        .run(&mut CycleContext::new(snapshot(), vec![]))
        .await
        .unwrap();

    let expected: Vec<(String, Vec<String>, u32)> =
        investment_stages(Arc::new(Scripted::cooperative()))
            .iter()
            .map(|stage| {
                (
                    stage.spec.name.to_string(),
                    stage
                        .spec
                        .allowed_tools
                        .iter()
                        .map(|t| t.to_string())
                        .collect(),
                    stage.spec.tool_budget,
                )
            })
            .collect();

    assert_eq!(*backend.seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn graph_with_missing_tools_is_rejected() {
    // The holdings and buy tools are absent from the available set.
    let result = WorkflowEngine::new(
        investment_stages(Arc::new(Scripted::cooperative())),
        STAGE_PORTFOLIO_ANALYSIS,
        15,
        &["atp_get_agents", "telegram_send_message"],
    );
    assert!(matches!(result, Err(BotError::InvalidConfig(_))));
}
