use crate::error::{Result, SourceError};
use crate::pipeline::processing::duplicates::DuplicateMatch;
use crate::types::{CompanyIdentity, FirmographicRecord, RawSourceRecord, SourceTag};
use async_trait::async_trait;
use serde_json::Value;

/// One external data provider.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source(&self) -> SourceTag;
    async fn fetch(&self, identity: &CompanyIdentity) -> std::result::Result<RawSourceRecord, SourceError>;
}

/// Free-form question answered with a JSON value.
#[async_trait]
pub trait AiQuery: Send + Sync {
    async fn query_json(&self, prompt: &str) -> std::result::Result<Value, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    Keep,
    Drop,
}

/// What an operator sees when asked about a suspected duplicate.
#[derive(Debug, Clone)]
pub struct DuplicateReview {
    pub identity: CompanyIdentity,
    pub record: FirmographicRecord,
    pub matches: Vec<DuplicateMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDecision {
    KeepCurrent,
    TakeProposed,
}

/// A validation correction waiting for operator approval.
#[derive(Debug, Clone)]
pub struct FieldReview {
    pub identity: CompanyIdentity,
    pub field: String,
    pub current: Value,
    pub proposed: Value,
    pub confidence: f64,
}

/// Operator decisions under human validation: suspected duplicates parked in
/// `AwaitingHumanInput`, and field values the validator wants to replace.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, review: &DuplicateReview) -> Result<DuplicateDecision>;
    async fn review_field(&self, review: &FieldReview) -> Result<FieldDecision>;
}
