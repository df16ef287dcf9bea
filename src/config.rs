use crate::constants::{
    DEFAULT_OUTPUT_DIR, ENV_DIFFBOT_TOKEN, ENV_LINKEDIN_JSESSIONID, ENV_LINKEDIN_LI_AT,
    ENV_PERPLEXITY_TOKEN,
};
use crate::error::{EnrichError, Result};
use crate::pipeline::ingestion::governor::RetryPolicy;
use crate::pipeline::ingestion::rate_limiter::RateLimitConfig;
use crate::pipeline::processing::currency::CurrencyConfig;
use crate::pipeline::processing::precedence::{FieldRuleOverride, PrecedenceTable};
use crate::types::SourceTag;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "enricher.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub paths: PathsConfig,
    pub rate_limits: RateLimitsConfig,
    pub retry: RetryPolicy,
    pub timeout_secs: u64,
    pub currency: CurrencyConfig,
    pub merge: MergeConfig,
    pub validation: ValidationConfig,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            retry: RetryPolicy::default(),
            timeout_secs: 60,
            currency: CurrencyConfig::default(),
            merge: MergeConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub linkedin: RateLimitConfig,
    pub diffbot: RateLimitConfig,
    pub perplexity: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            linkedin: RateLimitConfig::new(1, Duration::from_secs(60)),
            diffbot: RateLimitConfig::new(20, Duration::from_secs(60)),
            perplexity: RateLimitConfig::new(20, Duration::from_secs(60)),
        }
    }
}

impl RateLimitsConfig {
    pub fn for_source(&self, source: SourceTag) -> Option<RateLimitConfig> {
        match source {
            SourceTag::Linkedin => Some(self.linkedin),
            SourceTag::Diffbot => Some(self.diffbot),
            SourceTag::Perplexity => Some(self.perplexity),
            SourceTag::Input => None,
        }
    }
}

/// Per-field overrides layered on top of the default precedence table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub fields: BTreeMap<String, FieldRuleOverride>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum AI confidence before a field is overwritten
    pub confidence_threshold: f64,
    /// Also validate fields flagged during merge, not only requested ones
    pub resolve_conflicts: bool,
    /// Relative difference above which a numeric answer counts as a correction
    pub change_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            resolve_conflicts: true,
            change_tolerance: 0.1,
        }
    }
}

impl EnrichConfig {
    /// Load from an explicit path, else `enricher.toml` if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&config_path).map_err(|e| {
            EnrichError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EnrichConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rl) in [
            ("linkedin", &self.rate_limits.linkedin),
            ("diffbot", &self.rate_limits.diffbot),
            ("perplexity", &self.rate_limits.perplexity),
        ] {
            if rl.max_calls == 0 || rl.window_secs == 0 {
                return Err(EnrichError::Config(format!(
                    "rate limit for {} needs max_calls > 0 and window_secs > 0",
                    name
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(EnrichError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(EnrichError::Config("timeout_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.validation.confidence_threshold) {
            return Err(EnrichError::Config(
                "validation.confidence_threshold must be within 0..=1".into(),
            ));
        }
        self.currency.validate()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn precedence_table(&self) -> PrecedenceTable {
        PrecedenceTable::default().with_overrides(self.merge.fields.clone())
    }
}

/// API credentials, read from the environment only.
#[derive(Clone, Default)]
pub struct Credentials {
    pub linkedin_li_at: Option<String>,
    pub linkedin_jsessionid: Option<String>,
    pub diffbot_token: Option<String>,
    pub perplexity_token: Option<String>,
}

// Keep tokens out of debug logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("linkedin", &self.linkedin_li_at.is_some())
            .field("diffbot", &self.diffbot_token.is_some())
            .field("perplexity", &self.perplexity_token.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            linkedin_li_at: read(ENV_LINKEDIN_LI_AT),
            linkedin_jsessionid: read(ENV_LINKEDIN_JSESSIONID),
            diffbot_token: read(ENV_DIFFBOT_TOKEN),
            perplexity_token: read(ENV_PERPLEXITY_TOKEN),
        }
    }

    pub fn linkedin(&self) -> Result<(String, String)> {
        match (&self.linkedin_li_at, &self.linkedin_jsessionid) {
            (Some(li_at), Some(jsession)) => Ok((li_at.clone(), jsession.clone())),
            _ => Err(EnrichError::Config(format!(
                "LinkedIn selected but {} / {} are not set",
                ENV_LINKEDIN_LI_AT, ENV_LINKEDIN_JSESSIONID
            ))),
        }
    }

    pub fn diffbot(&self) -> Result<String> {
        self.diffbot_token.clone().ok_or_else(|| {
            EnrichError::Config(format!("Diffbot selected but {} is not set", ENV_DIFFBOT_TOKEN))
        })
    }

    pub fn perplexity(&self) -> Result<String> {
        self.perplexity_token.clone().ok_or_else(|| {
            EnrichError::Config(format!("validation requested but {} is not set", ENV_PERPLEXITY_TOKEN))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_limits() {
        let config = EnrichConfig::default();
        assert_eq!(config.rate_limits.linkedin.max_calls, 1);
        assert_eq!(config.rate_limits.diffbot.max_calls, 20);
        assert_eq!(config.rate_limits.perplexity.window(), Duration::from_secs(60));
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.currency.target, "USD");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EnrichConfig::from_toml(
            r#"
            timeout_secs = 30

            [rate_limits.diffbot]
            max_calls = 5
            window_secs = 10

            [currency]
            target = "EUR"

            [merge.fields.employee_count]
            sources = ["diffbot", "linkedin"]
            tolerance = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.rate_limits.diffbot.max_calls, 5);
        assert_eq!(config.rate_limits.linkedin.max_calls, 1);
        assert_eq!(config.currency.target, "EUR");
        let table = config.precedence_table();
        let rule = table.rule("employee_count").unwrap();
        assert_eq!(rule.sources, vec![SourceTag::Diffbot, SourceTag::Linkedin]);
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let err = EnrichConfig::from_toml(
            r#"
            [rate_limits.linkedin]
            max_calls = 0
            window_secs = 60
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EnrichError::Config(_)));
    }

    #[test]
    fn debug_output_hides_tokens() {
        let creds = Credentials {
            diffbot_token: Some("secret-token".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", creds).contains("secret-token"));
        assert!(creds.linkedin().is_err());
        assert_eq!(creds.diffbot().unwrap(), "secret-token");
    }
}
