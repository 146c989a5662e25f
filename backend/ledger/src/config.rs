//! Application configuration loaded from environment variables.

use rwa_protocol::{Account, ProtocolConfig, YieldSplit};

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Base URL of the custody / swap collaborator
    pub custody_url: String,
    pub admin_account: String,
    pub core_account: String,
    pub stake_pool_account: String,
    pub guaranty_pool_account: String,
    pub swap_account: String,
    /// How often (in seconds) the relay polls the outbox when idle
    pub relay_interval_secs: u64,
    /// Maximum number of outbox rows delivered per poll
    pub relay_batch_size: u32,
    pub stake_pct: u8,
    pub guaranty_pct: u8,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./rwa_ledger.db".to_string()),
            api_port: parsed("API_PORT", "3001")?,
            custody_url: env_var("CUSTODY_URL")
                .unwrap_or_else(|_| "http://localhost:8090".to_string()),
            admin_account: env_var("ADMIN_ACCOUNT").map_err(|_| {
                LedgerError::Config("ADMIN_ACCOUNT environment variable is required".to_string())
            })?,
            core_account: env_var("CORE_ACCOUNT").unwrap_or_else(|_| "rwa.core".to_string()),
            stake_pool_account: env_var("STAKE_POOL_ACCOUNT")
                .unwrap_or_else(|_| "rwa.stake".to_string()),
            guaranty_pool_account: env_var("GUARANTY_POOL_ACCOUNT")
                .unwrap_or_else(|_| "rwa.guaranty".to_string()),
            swap_account: env_var("SWAP_ACCOUNT").unwrap_or_else(|_| "rwa.swap".to_string()),
            relay_interval_secs: parsed("RELAY_INTERVAL_SECS", "5")?,
            relay_batch_size: parsed("RELAY_BATCH_SIZE", "50")?,
            stake_pct: parsed("STAKE_PCT", "80")?,
            guaranty_pct: parsed("GUARANTY_PCT", "10")?,
        })
    }

    /// Protocol configuration seeded from the environment. Runtime overrides
    /// from the `settings` table are applied on top by the service.
    pub fn protocol_config(&self) -> Result<ProtocolConfig> {
        if self.admin_account.trim().is_empty() {
            return Err(LedgerError::Config("ADMIN_ACCOUNT must not be empty".to_string()));
        }
        let mut config = ProtocolConfig::new(Account::from(self.admin_account.as_str()));
        config.core_account = Account::from(self.core_account.as_str());
        config.stake_pool_account = Account::from(self.stake_pool_account.as_str());
        config.guaranty_pool_account = Account::from(self.guaranty_pool_account.as_str());
        config.swap_account = Account::from(self.swap_account.as_str());
        config.split = YieldSplit::new(self.stake_pct, self.guaranty_pct)
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        Ok(config)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            custody_url: "http://127.0.0.1:9".to_string(),
            admin_account: "admin".to_string(),
            core_account: "rwa.core".to_string(),
            stake_pool_account: "rwa.stake".to_string(),
            guaranty_pool_account: "rwa.guaranty".to_string(),
            swap_account: "rwa.swap".to_string(),
            relay_interval_secs: 1,
            relay_batch_size: 10,
            stake_pct: 80,
            guaranty_pct: 10,
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LedgerError::Config(format!("Missing env var: {key}")))
}

fn parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| LedgerError::Config(format!("Invalid {key}")))
}
