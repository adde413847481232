use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// IQ token on Fraxtal mainnet
pub const IQ_TOKEN_ADDRESS: &str = "0x6EFB84bda519726Fa1c65558e520B92b51712101";
/// IQT test token used when `wallet.use_dev` is set
pub const IQT_TOKEN_ADDRESS: &str = "0xCc3023635dF54FC0e43F47bc4BeB90c3d1fbDa9f";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub wallet: WalletConfig,
    pub investment: InvestmentConfig,
    #[serde(default)]
    pub atp: AtpConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Private key for the investing wallet (hex, with or without 0x prefix)
    pub private_key: String,
    /// JSON-RPC endpoint used for the balance query
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Use the IQT dev token instead of mainnet IQ
    #[serde(default)]
    pub use_dev: bool,
}

fn default_rpc_url() -> String {
    "https://rpc.frax.com".to_string()
}

impl WalletConfig {
    /// Base token address the bot budgets in, honoring the dev switch
    pub fn token_address(&self) -> &'static str {
        if self.use_dev {
            IQT_TOKEN_ADDRESS
        } else {
            IQ_TOKEN_ADDRESS
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvestmentConfig {
    /// Fraction of the wallet balance to invest per cycle (e.g., 0.1 = 10%)
    #[serde(default = "default_fraction")]
    pub fraction: Decimal,
    /// Minimum investment floor in IQ
    #[serde(default = "default_min_investment")]
    pub min_investment: Decimal,
    /// How many past cycle outcomes to retain
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_fraction() -> Decimal {
    rust_decimal_macros::dec!(0.1)
}

fn default_min_investment() -> Decimal {
    rust_decimal_macros::dec!(1000)
}

fn default_history_capacity() -> usize {
    20
}

impl Default for InvestmentConfig {
    fn default() -> Self {
        Self {
            fraction: default_fraction(),
            min_investment: default_min_investment(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AtpConfig {
    /// Override for the ATP platform API base URL
    #[serde(default = "default_atp_api_url")]
    pub api_url: String,
    /// Optional agent router contract override
    #[serde(default)]
    pub agent_router_address: Option<String>,
}

fn default_atp_api_url() -> String {
    "https://app.iqai.com/api".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmConfig {
    /// Model selector passed through to the agent backend
    #[serde(default)]
    pub model: Option<String>,
    /// Global workflow step budget per cycle
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_steps() -> u32 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Destination chat for outcome notifications
    pub chat_id: String,
    /// Bot API token
    pub bot_token: String,
    /// Answer inbound messages in the chat with an interactive agent
    #[serde(default = "default_true")]
    pub interactive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Five-field cron expression, evaluated in UTC
    #[serde(default = "default_cron")]
    pub cron: String,
}

fn default_cron() -> String {
    "0 */3 * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("schedule.cron", "0 */3 * * *")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ATP_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (ATP_WALLET__PRIVATE_KEY, etc.)
            .add_source(
                Environment::with_prefix("ATP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.wallet.private_key.trim().len() < 5 {
            errors.push("wallet.private_key is required".to_string());
        }

        if self.investment.fraction <= Decimal::ZERO || self.investment.fraction > Decimal::ONE {
            errors.push("investment.fraction must be between 0 and 1".to_string());
        }

        if self.investment.min_investment < Decimal::ZERO {
            errors.push("investment.min_investment must not be negative".to_string());
        }

        if self.investment.history_capacity == 0 {
            errors.push("investment.history_capacity must be at least 1".to_string());
        }

        if self.telegram.chat_id.trim().is_empty() {
            errors.push("telegram.chat_id is required".to_string());
        }

        if self.telegram.bot_token.trim().is_empty() {
            errors.push("telegram.bot_token is required".to_string());
        }

        if self.llm.max_steps == 0 {
            errors.push("llm.max_steps must be at least 1".to_string());
        }

        if let Err(e) = croner::Cron::new(&self.schedule.cron).parse() {
            errors.push(format!("schedule.cron is not a valid cron expression: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
