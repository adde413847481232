use thiserror::Error;

/// Main error type for the investment bot
#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Wallet errors
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Balance query failed: {0}")]
    BalanceQuery(#[source] anyhow::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Tool invocation errors
    #[error("Tool invocation failed: {kind}: {message}")]
    Tool { kind: String, message: String },

    // Agent / LLM backend errors
    #[error("Agent error: {0}")]
    Agent(String),

    // Workflow errors
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Workflow step budget exhausted: {steps} steps taken, max {max}")]
    BudgetExhausted { steps: u32, max: u32 },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BotError
pub type Result<T> = std::result::Result<T, BotError>;

impl BotError {
    /// True when the error must terminate the process rather than just the
    /// current cycle. Only startup configuration problems qualify.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Config(_) | BotError::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        let err = BotError::InvalidConfig("missing wallet key".to_string());
        assert!(err.is_fatal());
    }

    #[test]
    fn cycle_errors_are_not_fatal() {
        let err = BotError::Tool {
            kind: "transport".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(!err.is_fatal());

        let err = BotError::BudgetExhausted { steps: 16, max: 15 };
        assert!(!err.is_fatal());
    }
}
