use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field name → value mapping shared by raw payloads and merged records.
pub type FieldMap = BTreeMap<String, Value>;

/// Shared firmographic field vocabulary
pub mod fields {
    pub const COMPANY_NAME: &str = "company_name";
    pub const COMPANY_URL: &str = "company_url";
    pub const LINKEDIN_URI: &str = "linkedin_uri";
    pub const EMPLOYEE_COUNT: &str = "employee_count";
    pub const IT_STAFF: &str = "it_staff";
    pub const HQ_ADDRESS: &str = "hq_address";
    pub const REVENUE: &str = "revenue";
    pub const INDUSTRY_VERTICALS: &str = "industry_verticals";
    pub const SPECIALTIES: &str = "specialties";
    pub const SIMILAR_COMPANIES: &str = "similar_companies";
    pub const TECHNOLOGIES: &str = "technologies";
    pub const NEWS_UPDATES: &str = "news_updates";
}

/// External data providers, plus the input row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Linkedin,
    Diffbot,
    Perplexity,
    Input,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Linkedin => "linkedin",
            SourceTag::Diffbot => "diffbot",
            SourceTag::Perplexity => "perplexity",
            SourceTag::Input => "input",
        }
    }

    /// Short name used in `raw_<source>_company_data.json`
    pub fn file_stem(&self) -> &'static str {
        match self {
            SourceTag::Linkedin => "li",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input row. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyIdentity {
    pub company_name: String,
    pub company_url: String,
    pub li_company_id: String,
    pub li_company_uri: String,
}

impl CompanyIdentity {
    pub fn new(name: &str, url: &str, li_company_id: &str, li_company_uri: &str) -> Self {
        Self {
            company_name: name.trim().to_string(),
            company_url: url.trim().to_string(),
            li_company_id: li_company_id.trim().to_string(),
            li_company_uri: li_company_uri.trim().to_string(),
        }
    }

    /// Checkpoint key: LinkedIn id, else lowercased URL, else lowercased name
    pub fn key(&self) -> String {
        if !self.li_company_id.is_empty() {
            self.li_company_id.clone()
        } else if !self.company_url.is_empty() {
            self.company_url.to_lowercase()
        } else {
            self.company_name.to_lowercase()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.company_name.is_empty() {
            &self.company_url
        } else {
            &self.company_name
        }
    }

    /// The row's own data, merged with the lowest precedence.
    pub fn as_input_record(&self) -> RawSourceRecord {
        let mut payload = FieldMap::new();
        if !self.company_name.is_empty() {
            payload.insert(fields::COMPANY_NAME.into(), Value::String(self.company_name.clone()));
        }
        if !self.company_url.is_empty() {
            payload.insert(fields::COMPANY_URL.into(), Value::String(self.company_url.clone()));
        }
        if !self.li_company_uri.is_empty() {
            payload.insert(fields::LINKEDIN_URI.into(), Value::String(self.li_company_uri.clone()));
        }
        RawSourceRecord::new(SourceTag::Input, self.display_name(), payload)
    }
}

/// Normalized output of one source call for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSourceRecord {
    pub source_tag: SourceTag,
    pub entity_name: String,
    pub payload: FieldMap,
}

impl RawSourceRecord {
    pub fn new(source_tag: SourceTag, entity_name: &str, payload: FieldMap) -> Self {
        Self {
            source_tag,
            entity_name: entity_name.to_string(),
            payload,
        }
    }

    /// Value for `field` when present and non-empty
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.payload.get(field).filter(|v| !is_empty_value(v))
    }
}

/// Why a field was flagged during merge or validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    SourceDisagreement,
    MissingCurrency,
    UnknownCurrency,
    PossibleDuplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateValue {
    pub source: SourceTag,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictFlag {
    pub field: String,
    pub reason: FlagReason,
    pub candidates: Vec<CandidateValue>,
}

/// A value that was replaced after the initial merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersededValue {
    pub value: Value,
    pub source: SourceTag,
    pub replaced_by: SourceTag,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    /// Sources whose values make up the current field value
    pub sources: Vec<SourceTag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<SupersededValue>,
}

impl FieldProvenance {
    pub fn from_source(source: SourceTag) -> Self {
        Self {
            sources: vec![source],
            superseded: Vec::new(),
        }
    }

    pub fn primary(&self) -> Option<SourceTag> {
        self.sources.first().copied()
    }
}

/// Merged result for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmographicRecord {
    pub company_key: String,
    pub entity_name: String,
    pub data: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictFlag>,
    #[serde(default)]
    pub provenance: BTreeMap<String, FieldProvenance>,
}

impl FirmographicRecord {
    pub fn new(company_key: &str, entity_name: &str) -> Self {
        Self {
            company_key: company_key.to_string(),
            entity_name: entity_name.to_string(),
            data: FieldMap::new(),
            conflicts: Vec::new(),
            provenance: BTreeMap::new(),
        }
    }

    pub fn has_flag(&self, field: &str, reason: &FlagReason) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.field == field && &c.reason == reason)
    }

    pub fn flagged_fields(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|c| c.field.as_str())
    }

    /// Replace a field value, keeping the old value and its source in provenance.
    pub fn overwrite(&mut self, field: &str, value: Value, source: SourceTag, reason: &str) {
        let previous = self.data.insert(field.to_string(), value);
        let entry = self.provenance.entry(field.to_string()).or_default();
        if let Some(old) = previous {
            let old_source = entry.primary().unwrap_or(SourceTag::Input);
            entry.superseded.push(SupersededValue {
                value: old,
                source: old_source,
                replaced_by: source,
                reason: reason.to_string(),
            });
        }
        entry.sources = vec![source];
    }
}

/// Null, blank strings, zero, and containers holding only empty values count as missing.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_empty_value),
        Value::Bool(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_prefers_linkedin_id_then_url() {
        let with_id = CompanyIdentity::new("Acme", "https://Acme.com", "acme-corp", "");
        assert_eq!(with_id.key(), "acme-corp");

        let url_only = CompanyIdentity::new("Acme", "https://Acme.com", "", "");
        assert_eq!(url_only.key(), "https://acme.com");

        let name_only = CompanyIdentity::new("Acme GmbH", "", "", "");
        assert_eq!(name_only.key(), "acme gmbh");
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!(0)));
        assert!(is_empty_value(&json!({"city": "", "country": null})));
        assert!(!is_empty_value(&json!({"city": "Berlin"})));
        assert!(!is_empty_value(&json!([1])));
    }

    #[test]
    fn overwrite_keeps_previous_value_as_provenance() {
        let mut record = FirmographicRecord::new("acme", "Acme");
        record.data.insert(fields::EMPLOYEE_COUNT.into(), json!(500));
        record
            .provenance
            .insert(fields::EMPLOYEE_COUNT.into(), FieldProvenance::from_source(SourceTag::Linkedin));

        record.overwrite(fields::EMPLOYEE_COUNT, json!(650), SourceTag::Perplexity, "validated");

        assert_eq!(record.data[fields::EMPLOYEE_COUNT], json!(650));
        let prov = &record.provenance[fields::EMPLOYEE_COUNT];
        assert_eq!(prov.sources, vec![SourceTag::Perplexity]);
        assert_eq!(prov.superseded[0].value, json!(500));
        assert_eq!(prov.superseded[0].source, SourceTag::Linkedin);
    }

    #[test]
    fn input_record_carries_row_fields() {
        let identity = CompanyIdentity::new("Acme", "acme.com", "1", "https://linkedin.com/company/acme");
        let record = identity.as_input_record();
        assert_eq!(record.source_tag, SourceTag::Input);
        assert_eq!(record.value(fields::COMPANY_URL), Some(&json!("acme.com")));
    }
}
