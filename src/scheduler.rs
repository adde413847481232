//! Cron-driven run loop
//!
//! One workflow traversal per schedule tick, evaluated in UTC. Cycles run
//! inline on the scheduler task, so ticks can never overlap: the next
//! occurrence is computed only after the current cycle finishes, and ticks
//! missed by a long cycle are skipped rather than queued.

use chrono::Utc;
use croner::Cron;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::{AppContext, CycleContext};
use crate::error::{BotError, Result};
use crate::history::InvestmentRecord;
use crate::workflow::{CycleOutcome, WorkflowEngine};

/// Run one full investment cycle: snapshot the wallet, validate the sized
/// investment, traverse the workflow, record the outcome.
pub async fn run_cycle(app: &AppContext, engine: &WorkflowEngine) -> Result<CycleOutcome> {
    info!("running investment cycle");

    let snapshot = app.wallet.snapshot().await?;
    info!(
        address = %snapshot.address,
        balance = %snapshot.formatted_balance,
        investment = %snapshot.formatted_investment,
        "wallet status"
    );

    let validation = app.wallet.validate(&snapshot);
    if !validation.is_valid {
        let reason = validation
            .error
            .unwrap_or_else(|| "investment validation failed".to_string());
        if let Some(recommendation) = validation.recommendation {
            warn!("recommendation: {recommendation}");
        }
        return Err(BotError::Validation(reason));
    }

    app.toolset.arm_cycle_guard(&snapshot).await;

    let previous_runs = app.recent_summaries().await;
    let budget = format!("{} IQ", snapshot.investment_amount);
    let mut ctx = CycleContext::new(snapshot, previous_runs);

    match engine.run(&mut ctx).await {
        Ok(outcome) => {
            if let Some(record) = &outcome.record {
                app.record_outcome(record.clone()).await;
            }
            info!("cycle result: {}", outcome.final_output);
            Ok(outcome)
        }
        Err(e) => {
            // No definitive outcome; remember the failure so future
            // decisions can see it.
            app.record_outcome(InvestmentRecord::failed_cycle(budget, e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Recurring scheduler over a five-field cron expression
pub struct Scheduler {
    cron: Cron,
    expression: String,
}

impl Scheduler {
    pub fn new(expression: &str) -> Result<Self> {
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| BotError::InvalidConfig(format!("invalid cron expression: {e}")))?;
        Ok(Self {
            cron,
            expression: expression.to_string(),
        })
    }

    /// Run until shutdown is signalled. Executes one cycle immediately,
    /// then one per tick. A shutdown signal is honored between cycles;
    /// a running cycle always completes first.
    pub async fn run(
        &self,
        app: &AppContext,
        engine: &WorkflowEngine,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("scheduled: {} (UTC)", self.expression);

        run_contained(app, engine).await;

        loop {
            let now = Utc::now();
            let next = self
                .cron
                .find_next_occurrence(&now, false)
                .map_err(|e| BotError::Internal(format!("cron evaluation failed: {e}")))?;
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, "sleeping until next tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    run_contained(app, engine).await;
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }
}

/// Contain any cycle error so the schedule continues indefinitely
async fn run_contained(app: &AppContext, engine: &WorkflowEngine) {
    if let Err(e) = run_cycle(app, engine).await {
        error!("cycle failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_cron_expressions_parse() {
        assert!(Scheduler::new("0 */3 * * *").is_ok());
        assert!(Scheduler::new("0 * * * *").is_ok());
    }

    #[test]
    fn invalid_cron_expression_is_a_config_error() {
        assert!(matches!(
            Scheduler::new("every three hours"),
            Err(BotError::InvalidConfig(_))
        ));
    }

    #[test]
    fn next_occurrence_is_in_the_future() {
        let scheduler = Scheduler::new("0 */3 * * *").unwrap();
        let now = Utc::now();
        let next = scheduler.cron.find_next_occurrence(&now, false).unwrap();
        assert!(next > now);
    }
}
