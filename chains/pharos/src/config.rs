use anyhow::{Context, Result};
use config::{Config, Environment, File};
use core_logic::error::ConfigError;
use core_logic::{LimiterConfig, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Remote API endpoints and the fixed values the service expects.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub login_url: String,
    pub faucet_status_url: String,
    pub faucet_claim_url: String,
    pub ip_echo_url: String,
    pub origin: String,
    pub referer: String,
    pub invite_code: String,
    pub sign_message: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            login_url: "https://api.pharosnetwork.xyz/user/login".to_string(),
            faucet_status_url: "https://api.pharosnetwork.xyz/faucet/status".to_string(),
            faucet_claim_url: "https://api.pharosnetwork.xyz/faucet/daily".to_string(),
            ip_echo_url: "https://api64.ipify.org?format=json".to_string(),
            origin: "https://testnet.pharosnetwork.xyz".to_string(),
            referer: "https://testnet.pharosnetwork.xyz/".to_string(),
            invite_code: "PfgObQse66AfgWpd".to_string(),
            sign_message: "pharos".to_string(),
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub login_threads: usize,
    pub claim_threads: usize,
    /// Identities whose workflow may be in flight at once.
    pub workflow_threads: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            login_threads: 2,
            claim_threads: 2,
            workflow_threads: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub rate_limit_base_ms: u64,
    pub transient_delay_ms: u64,
    pub auth_max_attempts: u32,
    pub onchain_max_attempts: u32,
    /// Overall attempts allowed per iteration in the on-chain loop.
    pub attempts_per_iteration: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            rate_limit_base_ms: RetryPolicy::RATE_LIMIT_BASE_MS,
            transient_delay_ms: RetryPolicy::TRANSIENT_DELAY_MS,
            auth_max_attempts: RetryPolicy::AUTH_MAX_ATTEMPTS,
            onchain_max_attempts: RetryPolicy::ONCHAIN_MAX_ATTEMPTS,
            attempts_per_iteration: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilesConfig {
    pub private_keys: String,
    pub proxies: String,
    pub faucet_success_log: String,
    pub faucet_failure_log: String,
    pub onchain_success_log: String,
    pub onchain_failure_log: String,
    pub log_dir: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            private_keys: "priv.txt".to_string(),
            proxies: "proxies.txt".to_string(),
            faucet_success_log: "./logs/success_log/pharos_success.txt".to_string(),
            faucet_failure_log: "./logs/failed_log/pharos_failed.txt".to_string(),
            onchain_success_log: "./logs/success_log/success.log".to_string(),
            onchain_failure_log: "./logs/failed_log/failed_tx.log".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub wphrs: String,
    pub usdc: String,
    pub usdt: String,
    pub swap_router: String,
    pub position_manager: String,
    pub swap_fee: u32,
    pub liquidity_fee: u32,
    /// Native balance below which no transaction is attempted.
    pub min_gas_balance: f64,
    /// WPHRS balance above which swaps go WPHRS -> USDC.
    pub wphrs_swap_threshold: f64,
    /// Native balance below which `gas_top_up_amount` WPHRS is unwrapped first.
    pub gas_top_up_below: f64,
    pub gas_top_up_amount: f64,
    /// After a successful iteration, WPHRS above this may be partly unwrapped.
    pub unwrap_above: f64,
    pub unwrap_chance: f64,
    /// USDC or USDT balance above which part of it is swapped to the other.
    pub rebalance_above: f64,
    /// Smallest source balance a rebalance swap will draw from.
    pub rebalance_source_min: f64,
    pub rebalance_chance: f64,
    /// Native PHRS swapped into USDC when a swap or mint is short of USDC.
    pub usdc_top_up_native: f64,
    pub tx_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://testnet.dplabs-internal.com".to_string(),
            chain_id: 688688,
            wphrs: "0x76aaaDA469D23216bE5f7C596fA25F282Ff9b364".to_string(),
            usdc: "0xAD902CF99C2dE2f1Ba5ec4d642fd7E49cae9EE37".to_string(),
            usdt: "0xEd59De2D7ad9C043442e381231eE3646FC3C2939".to_string(),
            swap_router: "0x1a4de519154ae51200b0ad7c90f7fac75547888a".to_string(),
            position_manager: "0xF8a1D4FF0f9b9Af7CE58E1fc1833688F3BFd6115".to_string(),
            swap_fee: 500,
            liquidity_fee: 500,
            min_gas_balance: 0.01,
            wphrs_swap_threshold: 0.01,
            gas_top_up_below: 0.05,
            gas_top_up_amount: 0.01,
            unwrap_above: 0.1,
            unwrap_chance: 0.3,
            rebalance_above: 50.0,
            rebalance_source_min: 20.0,
            rebalance_chance: 0.5,
            usdc_top_up_native: 0.01,
            tx_timeout_secs: 60,
            rpc_timeout_secs: 20,
        }
    }
}

/// Random pauses, all in milliseconds. Zero disables a pause.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub claim_jitter_min_ms: u64,
    pub claim_jitter_max_ms: u64,
    pub iteration_delay_min_ms: u64,
    pub iteration_delay_max_ms: u64,
    pub dispatch_delay_min_ms: u64,
    pub dispatch_delay_max_ms: u64,
    pub cooldown_hours: i64,
    pub base_cycles: u32,
    pub extra_cycles: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            claim_jitter_min_ms: 5_000,
            claim_jitter_max_ms: 10_000,
            iteration_delay_min_ms: 5_000,
            iteration_delay_max_ms: 10_000,
            dispatch_delay_min_ms: 500,
            dispatch_delay_max_ms: 1_500,
            cooldown_hours: 24,
            base_cycles: 2,
            extra_cycles: 1,
        }
    }
}

impl TimingConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours)
    }

    /// Uniform pick in `[min, max]`. A zero or inverted range collapses to `min`.
    pub fn pick(min_ms: u64, max_ms: u64) -> Duration {
        use rand::Rng;
        if max_ms <= min_ms {
            return Duration::from_millis(min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    pub fn claim_jitter(&self) -> Duration {
        Self::pick(self.claim_jitter_min_ms, self.claim_jitter_max_ms)
    }

    pub fn dispatch_delay(&self) -> Duration {
        Self::pick(self.dispatch_delay_min_ms, self.dispatch_delay_max_ms)
    }

    pub fn cycles(&self) -> u32 {
        use rand::Rng;
        self.base_cycles + rand::thread_rng().gen_range(0..=self.extra_cycles)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PharosConfig {
    pub api: ApiConfig,
    pub limits: LimitsConfig,
    pub retry: RetrySettings,
    pub files: FilesConfig,
    pub chain: ChainConfig,
    pub timing: TimingConfig,
    /// Restores the `address:privateKey` result line shape.
    pub log_private_keys: bool,
    /// Logs the proxy egress IP before each login attempt.
    pub log_proxy_ip: bool,
}

impl PharosConfig {
    /// Layers an optional TOML file and `PHAROS__SECTION__FIELD` environment
    /// overrides over the built-in defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("PHAROS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let config: PharosConfig = settings
            .try_deserialize()
            .context("Failed to deserialize config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls = [
            ("api.login_url", &self.api.login_url),
            ("api.faucet_status_url", &self.api.faucet_status_url),
            ("api.faucet_claim_url", &self.api.faucet_claim_url),
            ("api.ip_echo_url", &self.api.ip_echo_url),
            ("chain.rpc_url", &self.chain.rpc_url),
        ];
        for (field, value) in urls {
            if url::Url::parse(value).is_err() {
                return Err(ConfigError::InvalidUrl {
                    field: field.to_string(),
                    url: value.clone(),
                });
            }
        }

        let positive = [
            ("limits.login_threads", self.limits.login_threads),
            ("limits.claim_threads", self.limits.claim_threads),
            ("limits.workflow_threads", self.limits.workflow_threads),
            ("retry.auth_max_attempts", self.retry.auth_max_attempts as usize),
            ("retry.onchain_max_attempts", self.retry.onchain_max_attempts as usize),
            ("retry.attempts_per_iteration", self.retry.attempts_per_iteration as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.limits.workflow_threads > 100 {
            return Err(ConfigError::InvalidValue {
                field: "limits.workflow_threads".to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        let chances = [
            ("chain.unwrap_chance", self.chain.unwrap_chance),
            ("chain.rebalance_chance", self.chain.rebalance_chance),
        ];
        for (field, value) in chances {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be between 0 and 1".to_string(),
                });
            }
        }

        if self.api.sign_message.is_empty() {
            return Err(ConfigError::MissingField {
                field: "api.sign_message".to_string(),
            });
        }

        Ok(())
    }

    pub fn auth_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.auth_max_attempts,
            self.retry.rate_limit_base_ms,
            self.retry.transient_delay_ms,
        )
    }

    pub fn onchain_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.onchain_max_attempts,
            self.retry.rate_limit_base_ms,
            self.retry.transient_delay_ms,
        )
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            login: self.limits.login_threads,
            claim: self.limits.claim_threads,
            workflow: self.limits.workflow_threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PharosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.sign_message, "pharos");
        assert_eq!(config.limits.login_threads, 2);
        assert_eq!(config.auth_policy().max_attempts, 5);
        assert_eq!(config.onchain_policy().max_attempts, 3);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = PharosConfig::default();
        config.limits.claim_threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_bad_url_rejected() {
        let mut config = PharosConfig::default();
        config.api.login_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_chance_out_of_range_rejected() {
        let mut config = PharosConfig::default();
        config.chain.unwrap_chance = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "chain.unwrap_chance"
        ));
    }

    #[test]
    fn test_load_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "log_private_keys = true\n[limits]\nworkflow_threads = 7\n[timing]\nclaim_jitter_min_ms = 0\nclaim_jitter_max_ms = 0\n",
        )
        .unwrap();

        let config = PharosConfig::load(path.to_str().unwrap()).unwrap();
        assert!(config.log_private_keys);
        assert_eq!(config.limits.workflow_threads, 7);
        assert_eq!(config.limits.login_threads, 2);
        assert_eq!(config.timing.claim_jitter(), Duration::ZERO);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let config = PharosConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.chain.chain_id, 688688);
    }

    #[test]
    fn test_cycles_within_range() {
        let timing = TimingConfig::default();
        for _ in 0..20 {
            let c = timing.cycles();
            assert!((2..=3).contains(&c));
        }
    }
}
