//! Completion-gated workflow engine
//!
//! Drives the stage graph one stage at a time: execute, check the global
//! step budget, evaluate the sentinel gate, pick the successor. A stage
//! with no successors terminates the cycle and its structured output
//! becomes the cycle result.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::context::CycleContext;
use crate::error::{BotError, Result};
use crate::history::InvestmentRecord;

use super::stage::{sentinel_matched, Stage};

/// Result of one full traversal
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub record: Option<InvestmentRecord>,
    pub final_output: String,
    pub stages_run: Vec<String>,
}

pub struct WorkflowEngine {
    stages: Vec<Stage>,
    index: HashMap<&'static str, usize>,
    root: &'static str,
    max_steps: u32,
}

impl WorkflowEngine {
    /// Build the engine, rejecting misconfigured graphs up front: unknown
    /// successors, unknown tools in an allow-list, a missing root, a
    /// multi-successor stage without a sentinel to gate the choice.
    pub fn new(
        stages: Vec<Stage>,
        root: &'static str,
        max_steps: u32,
        available_tools: &[&str],
    ) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.spec.name, i).is_some() {
                return Err(BotError::InvalidConfig(format!(
                    "duplicate stage name: {}",
                    stage.spec.name
                )));
            }
        }

        if !index.contains_key(root) {
            return Err(BotError::InvalidConfig(format!(
                "root stage not registered: {root}"
            )));
        }

        for stage in &stages {
            for next in stage.spec.next {
                if !index.contains_key(next) {
                    return Err(BotError::InvalidConfig(format!(
                        "stage {} points at unknown stage {next}",
                        stage.spec.name
                    )));
                }
            }

            for tool in stage.spec.allowed_tools {
                if !available_tools.contains(tool) {
                    return Err(BotError::InvalidConfig(format!(
                        "stage {} allows unknown tool {tool}",
                        stage.spec.name
                    )));
                }
            }

            if !stage.spec.allowed_tools.is_empty() && stage.spec.tool_budget == 0 {
                return Err(BotError::InvalidConfig(format!(
                    "stage {} has tools but no tool budget",
                    stage.spec.name
                )));
            }

            if stage.spec.next.len() > 1 && stage.spec.sentinel.is_none() {
                return Err(BotError::InvalidConfig(format!(
                    "stage {} has multiple successors but no sentinel to gate them",
                    stage.spec.name
                )));
            }
        }

        Ok(Self {
            stages,
            index,
            root,
            max_steps,
        })
    }

    /// Run one full traversal over the given cycle context
    pub async fn run(&self, ctx: &mut CycleContext) -> Result<CycleOutcome> {
        let mut current = self.root;
        let mut steps_taken: u32 = 0;

        loop {
            let stage = &self.stages[self.index[current]];
            info!(stage = current, step = steps_taken + 1, "executing stage");

            let output = stage.exec.execute(&stage.spec, ctx).await?;
            steps_taken += 1;

            ctx.push_output(current, output.text.clone());
            if let Some(record) = output.record {
                ctx.record = Some(record);
            }

            if steps_taken > self.max_steps {
                warn!(steps_taken, max = self.max_steps, "workflow step budget exhausted");
                return Err(BotError::BudgetExhausted {
                    steps: steps_taken,
                    max: self.max_steps,
                });
            }

            let matched = match stage.spec.sentinel {
                Some(sentinel) => {
                    let matched = sentinel_matched(&output.text, sentinel);
                    debug!(stage = current, sentinel, matched, "advance condition evaluated");
                    matched
                }
                None => true,
            };

            match stage.spec.next {
                [] => {
                    info!(stage = current, steps_taken, "workflow reached terminal stage");
                    return Ok(CycleOutcome {
                        record: ctx.record.clone(),
                        final_output: output.text,
                        stages_run: ctx.stages_run().iter().map(|s| s.to_string()).collect(),
                    });
                }
                [single] => {
                    if !matched {
                        // Non-enforcing gate: a single successor leaves no
                        // ambiguity, so log and keep going.
                        warn!(
                            stage = current,
                            sentinel = stage.spec.sentinel.unwrap_or(""),
                            "completion sentinel missing from stage output; advancing anyway"
                        );
                    }
                    current = single;
                }
                multiple => {
                    if !matched {
                        return Err(BotError::Workflow(format!(
                            "stage {current} produced no completion sentinel and has {} successors; cannot disambiguate",
                            multiple.len()
                        )));
                    }
                    current = multiple[0];
                }
            }
        }
    }
}
