use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_cache::{CacheConfig, RetryPolicy};
use coffer_store::DocumentName;
use coffer_types::DEFAULT_MAX_WEIGHT;
use serde::{Deserialize, Serialize};

use crate::error::{EconomyError, EconomyResult};

/// Namespace the inventory store works in. Must be present in
/// [`EconomyConfig::namespaces`].
pub const INVENTORY_NAMESPACE: &str = "inventories";

/// Everything needed to open an [`Economy`](crate::Economy).
///
/// ```toml
/// data_dir = "/var/lib/coffer"
/// default_max_weight = 120.0
///
/// [namespaces.inventories]
/// document = "inventories"
/// ttl_ms = 60000
///
/// [retry]
/// dead_letter_after = 3
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub data_dir: PathBuf,
    pub default_max_weight: f64,
    /// JSON item catalogue; the built-in catalogue is used when unset.
    pub catalog_path: Option<PathBuf>,
    /// Cache namespaces to register, keyed by namespace name.
    pub namespaces: BTreeMap<String, NamespaceConfig>,
    pub retry: RetryConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let namespaces = DocumentName::ALL
            .into_iter()
            .map(|doc| (doc.as_str().to_string(), NamespaceConfig::for_document(doc)))
            .collect();
        Self {
            data_dir: PathBuf::from("./data"),
            default_max_weight: DEFAULT_MAX_WEIGHT,
            catalog_path: None,
            namespaces,
            retry: RetryConfig::default(),
        }
    }
}

impl EconomyConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(input: &str) -> EconomyResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| EconomyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> EconomyResult<String> {
        toml::to_string_pretty(self).map_err(|e| EconomyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EconomyResult<()> {
        if !self.default_max_weight.is_finite() || self.default_max_weight <= 0.0 {
            return Err(EconomyError::Config(format!(
                "default_max_weight must be a positive number, got {}",
                self.default_max_weight
            )));
        }
        match self.namespaces.get(INVENTORY_NAMESPACE) {
            Some(ns) if ns.document == DocumentName::Inventories => {}
            Some(ns) => {
                return Err(EconomyError::Config(format!(
                    "namespace {INVENTORY_NAMESPACE} must sync to inventories, not {}",
                    ns.document
                )))
            }
            None => {
                return Err(EconomyError::Config(format!(
                    "namespace {INVENTORY_NAMESPACE} is required"
                )))
            }
        }
        if self.retry.base_ms == 0 || self.retry.max_ms < self.retry.base_ms {
            return Err(EconomyError::Config(
                "retry delays must satisfy 0 < base_ms <= max_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for one cache namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub document: DocumentName,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_size() -> usize {
    1000
}

fn default_sync_interval_ms() -> u64 {
    30 * 1000
}

impl NamespaceConfig {
    pub fn for_document(document: DocumentName) -> Self {
        Self {
            document,
            ttl_ms: default_ttl_ms(),
            max_size: default_max_size(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            max_size: self.max_size,
            sync_interval: Duration::from_millis(self.sync_interval_ms),
            document: self.document,
        }
    }
}

/// Backoff and dead-letter settings for failed write-backs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub dead_letter_after: u32,
    pub dead_letter_capacity: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_ms: policy.base.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
            dead_letter_after: policy.dead_letter_after,
            dead_letter_capacity: policy.dead_letter_capacity,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.base_ms),
            max: Duration::from_millis(self.max_ms),
            dead_letter_after: self.dead_letter_after,
            dead_letter_capacity: self.dead_letter_capacity,
        }
    }
}
