pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod llm;
pub mod notify;
pub mod scheduler;
pub mod socials;
pub mod toolset;
pub mod wallet;
pub mod workflow;

pub use config::AppConfig;
pub use context::{AppContext, CycleContext};
pub use error::{BotError, Result};
pub use history::{HistoryLog, InvestmentRecord};
pub use llm::{ClaudeStageRunner, LlmBackend, StageRequest};
pub use scheduler::Scheduler;
pub use socials::SocialsAgent;
pub use toolset::{AtpClient, TelegramNotifier, Toolset};
pub use wallet::{JsonRpcBalanceSource, WalletService, WalletSnapshot};
pub use workflow::{investment_stages, CycleOutcome, WorkflowEngine};
