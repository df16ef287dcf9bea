//! Field-level source precedence used by the merger.
//!
//! Each firmographic field maps to an ordered list of preferred sources, a
//! strategy for combining them and a comparison used to detect disagreement
//! between the winner and the runner-up. Defaults can be overridden per field
//! from the `[merge.fields.<field>]` config section.

use crate::types::{fields, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Value of the first source that has one
    First,
    /// De-duplicated concatenation of every source's list
    Union,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    None,
    /// Case-insensitive string equality
    Exact,
    /// Relative difference within the rule tolerance
    Numeric,
    /// Country/city/state agreement
    Location,
    /// Amount agreement after currency normalization
    Revenue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub sources: Vec<SourceTag>,
    pub strategy: MergeStrategy,
    pub comparison: Comparison,
    pub tolerance: f64,
}

impl FieldRule {
    fn first(sources: &[SourceTag], comparison: Comparison, tolerance: f64) -> Self {
        Self {
            sources: sources.to_vec(),
            strategy: MergeStrategy::First,
            comparison,
            tolerance,
        }
    }

    fn union(sources: &[SourceTag]) -> Self {
        Self {
            sources: sources.to_vec(),
            strategy: MergeStrategy::Union,
            comparison: Comparison::None,
            tolerance: 0.0,
        }
    }

    fn apply(&mut self, ov: FieldRuleOverride) {
        if let Some(sources) = ov.sources {
            self.sources = sources;
        }
        if let Some(strategy) = ov.strategy {
            self.strategy = strategy;
        }
        if let Some(comparison) = ov.comparison {
            self.comparison = comparison;
        }
        if let Some(tolerance) = ov.tolerance {
            self.tolerance = tolerance;
        }
    }
}

/// Partial rule from config; unset parts keep the default rule's values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldRuleOverride {
    pub sources: Option<Vec<SourceTag>>,
    pub strategy: Option<MergeStrategy>,
    pub comparison: Option<Comparison>,
    pub tolerance: Option<f64>,
}

const DEFAULT_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecedenceTable {
    rules: BTreeMap<String, FieldRule>,
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        use SourceTag::*;
        let mut rules = BTreeMap::new();
        let mut put = |field: &str, rule: FieldRule| {
            rules.insert(field.to_string(), rule);
        };

        put(fields::COMPANY_NAME, FieldRule::first(&[Linkedin, Diffbot, Input], Comparison::Exact, 0.0));
        put(fields::COMPANY_URL, FieldRule::first(&[Input, Diffbot, Linkedin], Comparison::None, 0.0));
        put(fields::LINKEDIN_URI, FieldRule::first(&[Diffbot, Linkedin, Input], Comparison::None, 0.0));
        // the professional network is closest to the real headcount
        put(
            fields::EMPLOYEE_COUNT,
            FieldRule::first(&[Linkedin, Diffbot], Comparison::Numeric, DEFAULT_TOLERANCE),
        );
        put(fields::IT_STAFF, FieldRule::first(&[Diffbot], Comparison::None, 0.0));
        put(fields::HQ_ADDRESS, FieldRule::first(&[Diffbot, Linkedin], Comparison::Location, 0.0));
        put(
            fields::REVENUE,
            FieldRule::first(&[Diffbot, Linkedin], Comparison::Revenue, DEFAULT_TOLERANCE),
        );
        put(fields::INDUSTRY_VERTICALS, FieldRule::union(&[Diffbot, Linkedin]));
        put(fields::SPECIALTIES, FieldRule::first(&[Linkedin], Comparison::None, 0.0));
        put(fields::SIMILAR_COMPANIES, FieldRule::first(&[Diffbot], Comparison::None, 0.0));
        put(fields::TECHNOLOGIES, FieldRule::union(&[Diffbot]));
        put(fields::NEWS_UPDATES, FieldRule::union(&[Diffbot, Perplexity]));

        Self { rules }
    }
}

impl PrecedenceTable {
    pub fn with_overrides(mut self, overrides: BTreeMap<String, FieldRuleOverride>) -> Self {
        for (field, ov) in overrides {
            match self.rules.get_mut(&field) {
                Some(rule) => rule.apply(ov),
                None => {
                    // A new field needs at least a source list
                    let mut rule = FieldRule::first(&[], Comparison::None, DEFAULT_TOLERANCE);
                    rule.apply(ov);
                    if rule.sources.is_empty() {
                        tracing::warn!(field = %field, "ignoring merge override without sources");
                        continue;
                    }
                    self.rules.insert(field, rule);
                }
            }
        }
        self
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }

    /// Rules in field-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.rules.iter().map(|(f, r)| (f.as_str(), r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_prefers_linkedin_for_headcount_and_diffbot_for_revenue() {
        let table = PrecedenceTable::default();
        assert_eq!(table.rule(fields::EMPLOYEE_COUNT).unwrap().sources[0], SourceTag::Linkedin);
        let revenue = table.rule(fields::REVENUE).unwrap();
        assert_eq!(revenue.sources[0], SourceTag::Diffbot);
        assert_eq!(revenue.comparison, Comparison::Revenue);
        assert_eq!(
            table.rule(fields::NEWS_UPDATES).unwrap().strategy,
            MergeStrategy::Union
        );
    }

    #[test]
    fn override_changes_only_given_parts() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            fields::EMPLOYEE_COUNT.to_string(),
            FieldRuleOverride {
                tolerance: Some(0.5),
                ..Default::default()
            },
        );
        let table = PrecedenceTable::default().with_overrides(overrides);
        let rule = table.rule(fields::EMPLOYEE_COUNT).unwrap();
        assert_eq!(rule.tolerance, 0.5);
        assert_eq!(rule.comparison, Comparison::Numeric);
        assert_eq!(rule.sources, vec![SourceTag::Linkedin, SourceTag::Diffbot]);
    }

    #[test]
    fn unknown_field_without_sources_is_ignored() {
        let mut overrides = BTreeMap::new();
        overrides.insert("founded_year".to_string(), FieldRuleOverride::default());
        let table = PrecedenceTable::default().with_overrides(overrides);
        assert!(table.rule("founded_year").is_none());
    }
}
