use crate::models::{format_native, parse_native, WalletAddress};
use anyhow::{bail, Context, Result};
use ethers::types::U256;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Payment network
    pub rpc_url: String,
    pub chain_id: u64,
    pub network_name: String,

    // Pricing
    pub receiving_address: WalletAddress,
    pub required_payment_eth: String,

    // Autonomous payer
    pub payment_receiver_address: WalletAddress,
    pub agent_private_key: Option<String>,
    pub gas_buffer_eth: String,
    pub auto_pay_confirmations: usize,
    pub auto_pay_api_key: Option<String>,
    pub confirmation_timeout: Duration,

    // Ledger
    pub ledger_backend: LedgerBackend,
    pub redis_url: String,
    pub ledger_key_prefix: String,
    pub rejection_cache_ttl: Duration,

    // Rate Limiting
    pub global_rate_limit: RateLimit,
    pub verify_rate_limit: RateLimit,
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,

    pub cors_origins: Vec<String>,
    pub agent_backend_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let environment = Self::parse_environment(&or("ENVIRONMENT", "development"))?;

        let receiving_address = Self::parse_address("AGENT_WALLET_ADDRESS", var("AGENT_WALLET_ADDRESS"))?;
        let payment_receiver_address = match var("PAYMENT_RECEIVER_ADDRESS") {
            Some(raw) => Self::parse_address("PAYMENT_RECEIVER_ADDRESS", Some(raw))?,
            None => receiving_address,
        };

        let config = Self {
            environment,
            host: or("HOST", "0.0.0.0"),
            port: or("PORT", "5000").parse().context("Invalid PORT")?,

            rpc_url: or("SEPOLIA_RPC_URL", "https://rpc.sepolia.org"),
            chain_id: or("CHAIN_ID", "11155111")
                .parse()
                .context("Invalid CHAIN_ID")?,
            network_name: or("NETWORK_NAME", "Sepolia Testnet"),

            receiving_address,
            required_payment_eth: or("REQUIRED_PAYMENT_ETH", "0.001"),

            payment_receiver_address,
            agent_private_key: var("AGENT_PRIVATE_KEY").filter(|k| !k.trim().is_empty()),
            gas_buffer_eth: or("AUTO_PAY_GAS_BUFFER_ETH", "0.0005"),
            auto_pay_confirmations: or("AUTO_PAY_CONFIRMATIONS", "1")
                .parse()
                .context("Invalid AUTO_PAY_CONFIRMATIONS")?,
            auto_pay_api_key: var("AUTO_PAY_API_KEY").filter(|k| !k.trim().is_empty()),
            confirmation_timeout: Duration::from_secs(
                or("CONFIRMATION_TIMEOUT_SECS", "120")
                    .parse()
                    .context("Invalid CONFIRMATION_TIMEOUT_SECS")?,
            ),

            ledger_backend: Self::parse_ledger_backend(&or("LEDGER_BACKEND", "redis"))?,
            redis_url: or("REDIS_URL", "redis://localhost:6379"),
            ledger_key_prefix: or("LEDGER_KEY_PREFIX", "x402"),
            rejection_cache_ttl: Duration::from_secs(
                or("REJECTION_CACHE_TTL_SECS", "600")
                    .parse()
                    .context("Invalid REJECTION_CACHE_TTL_SECS")?,
            ),

            global_rate_limit: Self::parse_rate_limit(
                &or("RATE_LIMIT_MAX", "100"),
                &or("RATE_LIMIT_WINDOW_SECS", "900"),
            )
            .context("Invalid RATE_LIMIT_MAX / RATE_LIMIT_WINDOW_SECS")?,
            verify_rate_limit: Self::parse_rate_limit(
                &or("VERIFY_RATE_LIMIT_MAX", "10"),
                &or("VERIFY_RATE_LIMIT_WINDOW_SECS", "300"),
            )
            .context("Invalid VERIFY_RATE_LIMIT_MAX / VERIFY_RATE_LIMIT_WINDOW_SECS")?,
            trust_proxy_headers: or("TRUST_PROXY_HEADERS", "false")
                .parse()
                .context("Invalid TRUST_PROXY_HEADERS")?,
            trusted_proxies: Self::parse_proxies(&or("TRUSTED_PROXIES", ""))?,

            cors_origins: or("FRONTEND_URL", "http://localhost:5173")
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            agent_backend_url: var("AGENT_BACKEND_URL").filter(|u| !u.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment(env: &str) -> Result<Environment> {
        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_ledger_backend(raw: &str) -> Result<LedgerBackend> {
        match raw.to_lowercase().as_str() {
            "redis" => Ok(LedgerBackend::Redis),
            "memory" => Ok(LedgerBackend::Memory),
            _ => bail!("Unknown LEDGER_BACKEND: {}", raw),
        }
    }

    fn parse_address(var: &str, raw: Option<String>) -> Result<WalletAddress> {
        let addr_str = raw.with_context(|| format!("{} required", var))?;
        WalletAddress::parse(addr_str.trim()).with_context(|| format!("Invalid address for {}", var))
    }

    fn parse_proxies(raw: &str) -> Result<Vec<IpAddr>> {
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse()
                    .with_context(|| format!("Invalid TRUSTED_PROXIES entry: {}", p))
            })
            .collect()
    }

    fn parse_rate_limit(max: &str, window_secs: &str) -> Result<RateLimit> {
        let max_requests: u32 = max.parse()?;
        let window_secs: u64 = window_secs.parse()?;
        if max_requests == 0 || window_secs == 0 {
            bail!("rate limit values must be positive");
        }
        Ok(RateLimit {
            max_requests,
            window: Duration::from_secs(window_secs),
        })
    }

    fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            bail!("SEPOLIA_RPC_URL must be HTTP(S) URL");
        }
        if let Some(url) = &self.agent_backend_url {
            if !url.starts_with("http") {
                bail!("AGENT_BACKEND_URL must be HTTP(S) URL");
            }
        }

        let required = parse_native(&self.required_payment_eth)
            .context("Invalid REQUIRED_PAYMENT_ETH")?;
        if required.is_zero() {
            bail!("REQUIRED_PAYMENT_ETH must be greater than zero");
        }
        parse_native(&self.gas_buffer_eth).context("Invalid AUTO_PAY_GAS_BUFFER_ETH")?;

        if self.auto_pay_confirmations == 0 {
            bail!("AUTO_PAY_CONFIRMATIONS must be at least 1");
        }

        if let Some(key) = &self.agent_private_key {
            let digits = key.strip_prefix("0x").unwrap_or_default();
            if digits.len() != 64 || hex::decode(digits).is_err() {
                bail!("AGENT_PRIVATE_KEY must be 0x-prefixed 32-byte hex");
            }
        }

        if self.auto_pay_enabled() && self.payment_receiver_address != self.receiving_address {
            bail!(
                "PAYMENT_RECEIVER_ADDRESS must equal AGENT_WALLET_ADDRESS: \
                 auto-payments elsewhere cannot be credited"
            );
        }

        if self.trust_proxy_headers && self.trusted_proxies.is_empty() {
            bail!("TRUST_PROXY_HEADERS=true requires TRUSTED_PROXIES");
        }
        if !self.trust_proxy_headers && !self.trusted_proxies.is_empty() {
            tracing::warn!("TRUSTED_PROXIES is ignored while TRUST_PROXY_HEADERS is false");
        }

        if self.environment == Environment::Production {
            if self.ledger_backend == LedgerBackend::Memory {
                bail!("LEDGER_BACKEND=memory is not durable and is refused in production");
            }
            if self.agent_private_key.is_some() && self.auto_pay_api_key.is_none() {
                bail!("AUTO_PAY_API_KEY is required when auto-pay is enabled in production");
            }
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }

    pub fn auto_pay_enabled(&self) -> bool {
        self.agent_private_key.is_some()
    }

    /// Peers whose `x-forwarded-for` header the rate limiters may honour.
    pub fn proxy_allowlist(&self) -> Vec<IpAddr> {
        if self.trust_proxy_headers {
            self.trusted_proxies.clone()
        } else {
            Vec::new()
        }
    }

    pub fn payment_terms(&self) -> Result<PaymentTerms> {
        let required_atomic = parse_native(&self.required_payment_eth)
            .context("Invalid REQUIRED_PAYMENT_ETH")?;
        Ok(PaymentTerms {
            receiver: self.receiving_address,
            required_atomic,
            required_native: format_native(required_atomic),
            network: self.network_name.clone(),
            chain_id: self.chain_id,
            asset: "ETH".to_string(),
        })
    }

    pub fn gas_buffer(&self) -> Result<U256> {
        parse_native(&self.gas_buffer_eth).context("Invalid AUTO_PAY_GAS_BUFFER_ETH")
    }
}

/// Immutable price point every component reads from; built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    pub receiver: WalletAddress,
    pub required_atomic: U256,
    pub required_native: String,
    pub network: String,
    pub chain_id: u64,
    pub asset: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const RECEIVER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn defaults_follow_sepolia_deployment() {
        let config = Config::from_vars(vars(&[("AGENT_WALLET_ADDRESS", RECEIVER)])).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 5000);
        assert_eq!(config.chain_id, 11155111);
        assert_eq!(config.payment_receiver_address, config.receiving_address);
        assert!(!config.auto_pay_enabled());
        assert_eq!(config.global_rate_limit.max_requests, 100);
        assert_eq!(config.verify_rate_limit.window, Duration::from_secs(300));

        let terms = config.payment_terms().unwrap();
        assert_eq!(terms.required_atomic, U256::exp10(15));
        assert_eq!(terms.required_native, "0.001");
        assert_eq!(terms.receiver.to_string(), RECEIVER);
    }

    #[test]
    fn receiving_address_is_required() {
        let err = Config::from_vars(vars(&[])).unwrap_err();
        assert!(err.to_string().contains("AGENT_WALLET_ADDRESS"));
    }

    #[test]
    fn rejects_float_style_prices() {
        let result = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("REQUIRED_PAYMENT_ETH", "1e-3"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn production_refuses_memory_ledger_and_open_auto_pay() {
        let key = format!("0x{}", "1".repeat(64));

        let memory = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("ENVIRONMENT", "production"),
            ("LEDGER_BACKEND", "memory"),
        ]));
        assert!(memory.is_err());

        let open_auto_pay = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("ENVIRONMENT", "production"),
            ("AGENT_PRIVATE_KEY", key.as_str()),
        ]));
        assert!(open_auto_pay.is_err());

        let guarded = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("ENVIRONMENT", "production"),
            ("AGENT_PRIVATE_KEY", key.as_str()),
            ("AUTO_PAY_API_KEY", "s3cret"),
        ]))
        .unwrap();
        assert!(guarded.auto_pay_enabled());
    }

    #[test]
    fn private_key_shape_is_checked() {
        let result = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("AGENT_PRIVATE_KEY", "deadbeef"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn auto_pay_recipient_must_be_the_receiving_address() {
        let key = format!("0x{}", "1".repeat(64));
        let elsewhere = "0x2222222222222222222222222222222222222222";

        let result = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("PAYMENT_RECEIVER_ADDRESS", elsewhere),
            ("AGENT_PRIVATE_KEY", key.as_str()),
        ]));
        assert!(result.is_err());

        let without_payer = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("PAYMENT_RECEIVER_ADDRESS", elsewhere),
        ]));
        assert!(without_payer.is_ok());
    }

    #[test]
    fn forwarded_headers_need_an_explicit_proxy_list() {
        let defaults = Config::from_vars(vars(&[("AGENT_WALLET_ADDRESS", RECEIVER)])).unwrap();
        assert!(!defaults.trust_proxy_headers);
        assert!(defaults.proxy_allowlist().is_empty());

        let untrusted = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("TRUSTED_PROXIES", "10.0.0.5"),
        ]))
        .unwrap();
        assert!(untrusted.proxy_allowlist().is_empty());

        let missing_list = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("TRUST_PROXY_HEADERS", "true"),
        ]));
        assert!(missing_list.is_err());

        let trusted = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("TRUST_PROXY_HEADERS", "true"),
            ("TRUSTED_PROXIES", "10.0.0.5, ::1"),
        ]))
        .unwrap();
        let expected: Vec<IpAddr> = vec!["10.0.0.5".parse().unwrap(), "::1".parse().unwrap()];
        assert_eq!(trusted.proxy_allowlist(), expected);

        let bad_entry = Config::from_vars(vars(&[
            ("AGENT_WALLET_ADDRESS", RECEIVER),
            ("TRUST_PROXY_HEADERS", "true"),
            ("TRUSTED_PROXIES", "proxy.internal"),
        ]));
        assert!(bad_entry.is_err());
    }
}
