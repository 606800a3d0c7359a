use crate::application::scheduler::DEFAULT_SWEEP_INTERVAL;
use crate::application::webhook::DEFAULT_TOLERANCE;
use crate::domain::fees::ProcessorId;
use crate::infrastructure::processors::chase::{ChaseConfig, ChaseProcessor};
use crate::infrastructure::processors::sandbox::SandboxProcessor;
use crate::infrastructure::processors::stripe::{STRIPE_API_BASE, StripeConfig, StripeProcessor};
use crate::infrastructure::registry::ProcessorRegistry;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Runtime settings. Every field can come from a flag or the environment
/// (a `.env` file is loaded first).
#[derive(Args, Debug, Clone)]
pub struct SettlementConfig {
    /// Interface the HTTP server binds to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// tracing filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Shared secret for gateway webhook signatures
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    #[arg(long, env = "WEBHOOK_TOLERANCE_SECS", default_value_t = DEFAULT_TOLERANCE.as_secs())]
    pub webhook_tolerance_secs: u64,

    #[arg(long, env = "GATEWAY_TIMEOUT_MS", default_value_t = 15_000)]
    pub gateway_timeout_ms: u64,

    /// How often expired supplements and cancellations are swept
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "CURRENCY", default_value = "usd")]
    pub currency: String,

    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    pub stripe_secret_key: Option<String>,

    #[arg(long, env = "STRIPE_API_BASE", default_value = STRIPE_API_BASE)]
    pub stripe_api_base: String,

    /// Replace every gateway with the in-process sandbox
    #[arg(long, env = "STRIPE_MOCK")]
    pub stripe_mock: bool,

    #[arg(long, env = "CHASE_ENABLED")]
    pub chase_enabled: bool,

    #[arg(long, env = "CHASE_MERCHANT_ID")]
    pub chase_merchant_id: Option<String>,

    #[arg(long, env = "CHASE_API_KEY", hide_env_values = true)]
    pub chase_api_key: Option<String>,

    #[arg(long, env = "CHASE_API_BASE")]
    pub chase_api_base: Option<String>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,
}

impl SettlementConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.webhook_tolerance_secs)
    }

    pub fn stripe(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.stripe_secret_key.clone(),
            api_base: self.stripe_api_base.clone(),
            timeout: self.gateway_timeout(),
        }
    }

    pub fn chase(&self) -> ChaseConfig {
        let defaults = ChaseConfig::default();
        ChaseConfig {
            enabled: self.chase_enabled,
            merchant_id: self.chase_merchant_id.clone(),
            api_key: self.chase_api_key.clone(),
            api_base: self.chase_api_base.clone().unwrap_or(defaults.api_base),
            timeout: self.gateway_timeout(),
        }
    }

    /// Both processors are always registered; unconfigured ones still show up in
    /// comparisons but refuse holds.
    pub fn processor_registry(&self) -> ProcessorRegistry {
        if self.stripe_mock {
            warn!("gateway mock mode enabled, no real card will be charged");
            return ProcessorRegistry::new()
                .with(Arc::new(SandboxProcessor::new(ProcessorId::Stripe)))
                .with(Arc::new(SandboxProcessor::new(ProcessorId::Chase)));
        }
        ProcessorRegistry::new()
            .with(Arc::new(StripeProcessor::new(self.stripe())))
            .with(Arc::new(ChaseProcessor::new(self.chase())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: SettlementConfig,
    }

    #[test]
    fn test_flags_override_defaults() {
        let harness = Harness::parse_from([
            "test",
            "--port",
            "9090",
            "--gateway-timeout-ms",
            "2500",
            "--stripe-mock",
        ]);
        let config = harness.config;
        assert_eq!(config.port, 9090);
        assert_eq!(config.gateway_timeout(), Duration::from_millis(2500));
        assert!(config.stripe_mock);
        assert_eq!(config.stripe().timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_registry_lists_both_processors() {
        let harness = Harness::parse_from(["test", "--stripe-secret-key", "sk_test_1"]);
        let registry = harness.config.processor_registry();
        assert_eq!(registry.ids(), vec![ProcessorId::Stripe, ProcessorId::Chase]);
        assert!(registry.get(ProcessorId::Stripe).unwrap().is_configured());
        assert!(!registry.get(ProcessorId::Chase).unwrap().is_configured());
    }
}
