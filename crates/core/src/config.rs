use crate::error::ConfigError;
use crate::template::PathTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub oracle: OracleConfig,
    pub classification: ClassificationConfig,
    pub templates: TemplateConfig,
    pub placement: PlacementConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Glob patterns matched against absolute paths.
    pub exclude: Vec<String>,
    pub include_hidden: bool,
    /// Files above this size get the partial (head + tail) fingerprint.
    pub large_file_threshold: u64,
    pub partial_hash_bytes: u64,
    /// Upper bound on the excerpt sent to the oracle.
    pub excerpt_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include_hidden: false,
            large_file_threshold: 256 * 1024 * 1024,
            partial_hash_bytes: 1024 * 1024,
            excerpt_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: "heuristic".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            batch_size: 10,
            max_in_flight: 4,
            request_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl OracleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Run-wide gate: `confidence >= threshold` is accepted.
    pub threshold: f32,
    /// Field that selects a category template.
    pub category_field: String,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            category_field: "category".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub default: String,
    pub by_category: HashMap<String, String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default: "{category}/{doc_type}".to_string(),
            by_category: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Defaults to `<output>/.shelver`.
    pub dir: Option<String>,
    /// Move an unreadable state database aside instead of aborting.
    pub discard_corrupt: bool,
}

impl StateConfig {
    pub fn dir_for(&self, output_root: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(dir),
            None => output_root.join(".shelver"),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle.batch_size == 0 {
            return Err(ConfigError::Invalid("oracle.batch_size must be at least 1".into()));
        }
        if self.oracle.max_in_flight == 0 {
            return Err(ConfigError::Invalid("oracle.max_in_flight must be at least 1".into()));
        }
        if self.oracle.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "oracle.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.oracle.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "oracle.request_timeout_secs must be at least 1".into(),
            ));
        }
        let t = self.classification.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::Invalid(format!(
                "classification.threshold must be within [0, 1], got {t}"
            )));
        }
        if self.classification.category_field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "classification.category_field must not be empty".into(),
            ));
        }
        PathTemplate::parse("default", &self.templates.default)?;
        for (category, source) in &self.templates.by_category {
            PathTemplate::parse(category, source)?;
        }
        Ok(())
    }
}

/// Layers built-in defaults, an optional TOML file and `SHELVER_*` environment
/// variables (`SHELVER_ORACLE__BATCH_SIZE=20`).
pub fn load(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("SHELVER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
