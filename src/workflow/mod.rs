pub mod engine;
pub mod stage;
pub mod stages;

pub use engine::{CycleOutcome, WorkflowEngine};
pub use stage::{Stage, StageExec, StageOutput, StageSpec};
pub use stages::investment_stages;
