//! Workflow stage definitions
//!
//! A stage is a named unit of prompt-driven work with a static spec: which
//! tools it may call, how many tool calls it gets, which stages may follow
//! it, and which completion sentinel gates advancement.

use async_trait::async_trait;

use crate::context::CycleContext;
use crate::error::Result;
use crate::history::InvestmentRecord;

/// Structured result of one stage execution. The text is what the sentinel
/// gate inspects; the record only appears once execution has happened.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub text: String,
    pub record: Option<InvestmentRecord>,
}

impl StageOutput {
    pub fn text_only(text: String) -> Self {
        Self { text, record: None }
    }
}

/// Behavior of a stage, one implementation per stage kind. The engine
/// hands each execution its own spec so the tool allow-list and call
/// budget come from one place.
#[async_trait]
pub trait StageExec: Send + Sync {
    async fn execute(&self, spec: &StageSpec, ctx: &mut CycleContext) -> Result<StageOutput>;
}

/// Static shape of a stage, fixed at startup
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: &'static str,
    /// Completion sentinel the engine looks for before advancing.
    /// Terminal stages have none.
    pub sentinel: Option<&'static str>,
    pub allowed_tools: &'static [&'static str],
    pub tool_budget: u32,
    pub next: &'static [&'static str],
}

/// A registered stage: spec plus behavior
pub struct Stage {
    pub spec: StageSpec,
    pub exec: Box<dyn StageExec>,
}

/// Case-insensitive substring check for a completion sentinel
pub fn sentinel_matched(output: &str, sentinel: &str) -> bool {
    output.to_lowercase().contains(&sentinel.to_lowercase())
}
