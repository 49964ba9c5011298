//! Engine configuration types

use crate::engine::EngineSettings;
use crate::sender::TrustedForwarders;
use prodfund_core::{FundError, ParticipantId, Result, Tier, TierCatalog, ANNUAL_RATE, WAD};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Complete engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Access control and yield parameters
    #[serde(default)]
    pub engine: EngineSection,

    /// Tier catalog
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            tiers: default_tiers(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build and validate the tier catalog
    pub fn tier_catalog(&self) -> Result<TierCatalog> {
        TierCatalog::new(
            self.tiers
                .iter()
                .map(|t| Tier::from_days(t.lock_days, t.multiplier_wad as u128))
                .collect(),
        )
    }

    /// Validated annual rate
    pub fn annual_rate(&self) -> Result<u128> {
        let rate = self.engine.annual_rate_wad as u128;
        if rate > WAD {
            return Err(FundError::InvalidInput(format!(
                "annual rate {} exceeds 100%",
                rate
            )));
        }
        Ok(rate)
    }

    /// Privileged identity
    pub fn admin_id(&self) -> ParticipantId {
        ParticipantId::resolve(&self.engine.admin)
    }

    /// Trusted forwarders
    pub fn relayers(&self) -> TrustedForwarders {
        TrustedForwarders::from_relayers(
            self.engine
                .trusted_relayers
                .iter()
                .map(|r| ParticipantId::resolve(r)),
        )
    }

    /// Resolve everything the engine needs
    pub fn settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            admin: self.admin_id(),
            catalog: self.tier_catalog()?,
            annual_rate: self.annual_rate()?,
            relayers: Arc::new(self.relayers()),
        })
    }
}

/// Access control and yield parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineSection {
    /// Admin identity: 64-hex id or label
    #[serde(default = "default_admin")]
    pub admin: String,

    /// Trusted relayers: 64-hex ids or labels
    #[serde(default)]
    pub trusted_relayers: Vec<String>,

    /// Annual pool yield rate (WAD)
    #[serde(default = "default_annual_rate")]
    pub annual_rate_wad: u64,
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_annual_rate() -> u64 {
    ANNUAL_RATE as u64
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            admin: default_admin(),
            trusted_relayers: Vec::new(),
            annual_rate_wad: default_annual_rate(),
        }
    }
}

/// One tier entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierConfig {
    /// Lock length in days
    pub lock_days: u64,
    /// Reputation multiplier (WAD)
    pub multiplier_wad: u64,
}

fn default_tiers() -> Vec<TierConfig> {
    TierCatalog::reference()
        .iter()
        .map(|t| TierConfig {
            lock_days: t.lock_days(),
            multiplier_wad: t.reputation_multiplier as u64,
        })
        .collect()
}

/// Storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
