use crate::types::CompanyIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*://").unwrap());
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "gmbh", "plc",
    "sa", "ag", "bv",
];

/// Which normalized attribute two input rows share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateBasis {
    Domain,
    Name,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub other: CompanyIdentity,
    pub basis: DuplicateBasis,
}

/// Index of input rows by normalized domain and normalized name.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    rows: Vec<CompanyIdentity>,
    by_domain: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
}

impl DuplicateIndex {
    pub fn build(companies: &[CompanyIdentity]) -> Self {
        let mut index = Self {
            rows: companies.to_vec(),
            ..Default::default()
        };
        for (i, company) in companies.iter().enumerate() {
            if let Some(domain) = normalize_domain(&company.company_url) {
                index.by_domain.entry(domain).or_default().push(i);
            }
            if let Some(name) = normalize_name(&company.company_name) {
                index.by_name.entry(name).or_default().push(i);
            }
        }
        index
    }

    /// Other rows that look like the same company, in input order.
    pub fn find(&self, identity: &CompanyIdentity) -> Vec<DuplicateMatch> {
        let mut matches: Vec<(usize, DuplicateBasis)> = Vec::new();
        let key = identity.key();

        let mut collect = |rows: Option<&Vec<usize>>, basis: DuplicateBasis| {
            for &i in rows.into_iter().flatten() {
                if self.rows[i].key() != key && !matches.iter().any(|(j, _)| *j == i) {
                    matches.push((i, basis));
                }
            }
        };
        if let Some(domain) = normalize_domain(&identity.company_url) {
            collect(self.by_domain.get(&domain), DuplicateBasis::Domain);
        }
        if let Some(name) = normalize_name(&identity.company_name) {
            collect(self.by_name.get(&name), DuplicateBasis::Name);
        }

        matches.sort_by_key(|(i, _)| *i);
        matches
            .into_iter()
            .map(|(i, basis)| DuplicateMatch {
                other: self.rows[i].clone(),
                basis,
            })
            .collect()
    }
}

/// `https://www.Acme.com/about` → `acme.com`
pub fn normalize_domain(url: &str) -> Option<String> {
    let lower = url.trim().to_lowercase();
    let without_scheme = SCHEME.replace(&lower, "");
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// `Acme Holdings, Inc.` → `acmeholdings`
pub fn normalize_name(name: &str) -> Option<String> {
    let lower = name.trim().to_lowercase();
    let words: Vec<&str> = NON_ALNUM.split(&lower).filter(|w| !w.is_empty()).collect();
    let mut end = words.len();
    while end > 1 && LEGAL_SUFFIXES.contains(&words[end - 1]) {
        end -= 1;
    }
    let joined = words[..end].concat();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
