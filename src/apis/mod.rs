pub mod diffbot;
pub mod linkedin;
pub mod perplexity;

use crate::app::ports::SourceClient;
use crate::config::{Credentials, EnrichConfig};
use crate::error::{EnrichError, Result};
use crate::pipeline::ingestion::governor::RequestGovernor;
use crate::pipeline::ingestion::rate_limiter::SourceLimiters;
use crate::types::SourceTag;
use std::sync::Arc;

use self::diffbot::DiffbotClient;
use self::linkedin::LinkedinClient;
use self::perplexity::PerplexityClient;

/// Which firmographic providers a run queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSelection {
    #[default]
    Both,
    LinkedinOnly,
    DiffbotOnly,
}

impl SourceSelection {
    pub fn sources(&self) -> Vec<SourceTag> {
        match self {
            SourceSelection::Both => vec![SourceTag::Linkedin, SourceTag::Diffbot],
            SourceSelection::LinkedinOnly => vec![SourceTag::Linkedin],
            SourceSelection::DiffbotOnly => vec![SourceTag::Diffbot],
        }
    }
}

/// Shared pieces every client is built from.
pub struct ClientFactory<'a> {
    pub http: reqwest::Client,
    pub config: &'a EnrichConfig,
    pub credentials: &'a Credentials,
    pub limiters: &'a SourceLimiters,
}

impl ClientFactory<'_> {
    fn governor(&self, source: SourceTag) -> Result<RequestGovernor> {
        let limiter = self.limiters.get(source).ok_or_else(|| {
            EnrichError::Config(format!("no rate limit configured for {}", source))
        })?;
        Ok(RequestGovernor::new(limiter, self.config.retry, self.config.timeout()))
    }

    /// Firmographic client for `source`. Missing credentials are a configuration error.
    pub fn create_source(&self, source: SourceTag) -> Result<Arc<dyn SourceClient>> {
        match source {
            SourceTag::Linkedin => {
                let (li_at, jsessionid) = self.credentials.linkedin()?;
                Ok(Arc::new(LinkedinClient::new(
                    self.http.clone(),
                    li_at,
                    jsessionid,
                    self.governor(source)?,
                )))
            }
            SourceTag::Diffbot => Ok(Arc::new(DiffbotClient::new(
                self.http.clone(),
                self.credentials.diffbot()?,
                self.governor(source)?,
            ))),
            SourceTag::Perplexity => {
                let client: Arc<dyn SourceClient> = self.create_perplexity()?;
                Ok(client)
            }
            SourceTag::Input => Err(EnrichError::Config(
                "the input file is not a queryable source".into(),
            )),
        }
    }

    pub fn create_perplexity(&self) -> Result<Arc<PerplexityClient>> {
        Ok(Arc::new(PerplexityClient::new(
            self.http.clone(),
            self.credentials.perplexity()?,
            self.governor(SourceTag::Perplexity)?,
        )))
    }
}
