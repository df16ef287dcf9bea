use crate::app::ports::SourceClient;
use crate::constants::{DIFFBOT_DQL_URL, MAX_LIST_ITEMS};
use crate::error::SourceError;
use crate::infra::http_client::json_body;
use crate::pipeline::ingestion::governor::RequestGovernor;
use crate::types::{fields, CompanyIdentity, FieldMap, RawSourceRecord, SourceTag};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Employee category keywords counted as IT staff. Entries of two letters or
/// fewer only match whole words.
const IT_KEYWORDS: &[&str] = &[
    "engineer", "develop", "program", "tech", "it", "software", "system", "data", "cyber",
    "security", "network", "cloud", "devops", "architecture", "frontend", "backend", "fullstack",
    "web", "mobile", "app", "infra", "platform", "solution", "support", "analyst", "admin",
    "database", "ai", "ml", "artificial", "machine", "computing", "digital", "information",
];

const NEWS_KEYWORDS: &[&str] = &["merger", "acquisition", "hiring", "security", "digital transformation"];

/// Knowledge-graph lookup by company URL.
pub struct DiffbotClient {
    http: reqwest::Client,
    token: String,
    governor: RequestGovernor,
    endpoint: String,
}

impl DiffbotClient {
    pub fn new(http: reqwest::Client, token: String, governor: RequestGovernor) -> Self {
        Self {
            http,
            token,
            governor,
            endpoint: DIFFBOT_DQL_URL.to_string(),
        }
    }

    async fn query(&self, company_url: &str) -> Result<Value, SourceError> {
        let dql = format!("type:Organization allUris:\"{}\"", company_url);
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("type", "query"),
                ("query", dql.as_str()),
                ("col", "all"),
                ("size", "10"),
                ("format", "json"),
                ("nonCanonicalFacts", "true"),
                ("token", self.token.as_str()),
            ])
            .send()
            .await?;
        json_body(response, "diffbot").await
    }
}

#[async_trait]
impl SourceClient for DiffbotClient {
    fn source(&self) -> SourceTag {
        SourceTag::Diffbot
    }

    #[instrument(skip(self, identity), fields(company = %identity.display_name()))]
    async fn fetch(&self, identity: &CompanyIdentity) -> Result<RawSourceRecord, SourceError> {
        if identity.company_url.is_empty() {
            return Err(SourceError::NotFound("no company URL to look up".into()));
        }
        let this = self;
        let url = identity.company_url.as_str();
        let body = self.governor.call("dql", move || this.query(url)).await?;
        structure_response(identity.display_name(), &body)
    }
}

/// Reduce a DQL response to the firmographic field vocabulary.
pub fn structure_response(entity_name: &str, body: &Value) -> Result<RawSourceRecord, SourceError> {
    let entity = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|first| first.get("entity"))
        .ok_or_else(|| SourceError::NotFound(format!("no organization found for {}", entity_name)))?;

    let mut payload = FieldMap::new();
    let mut put = |field: &str, value: Option<Value>| {
        if let Some(v) = value {
            payload.insert(field.to_string(), v);
        }
    };

    put(fields::COMPANY_NAME, str_field(entity, "name").map(Value::from));
    put(fields::COMPANY_URL, str_field(entity, "homepageUri").map(Value::from));
    put(fields::LINKEDIN_URI, str_field(entity, "linkedInUri").map(Value::from));
    put(fields::EMPLOYEE_COUNT, employee_count(entity).map(Value::from));
    put(fields::IT_STAFF, it_staff(entity).map(Value::from));
    put(fields::HQ_ADDRESS, headquarters(entity));
    put(fields::REVENUE, revenue(entity));
    put(fields::INDUSTRY_VERTICALS, sorted_names(entity.get("industries"), |i| name_of(i)));
    put(fields::SIMILAR_COMPANIES, competitors(entity));
    put(
        fields::TECHNOLOGIES,
        sorted_names(entity.get("technographics"), |t| {
            t.get("technology").and_then(|tech| str_field(tech, "name"))
        }),
    );
    put(fields::NEWS_UPDATES, relevant_articles(entity));

    debug!(entity_name, fields = payload.len(), "structured diffbot entity");
    Ok(RawSourceRecord::new(SourceTag::Diffbot, entity_name, payload))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        other => str_field(other, "name"),
    }
}

fn positive_int(value: Option<&Value>) -> Option<u64> {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .filter(|n| *n > 0)
}

/// NAICS classification first, then the entity-level counts.
fn employee_count(entity: &Value) -> Option<u64> {
    let naics = entity
        .get("naicsClassification")
        .and_then(Value::as_array)
        .and_then(|list| list.iter().find_map(|c| positive_int(c.get("nbEmployees"))));
    naics
        .or_else(|| positive_int(entity.get("nbEmployees")))
        .or_else(|| positive_int(entity.get("employeesRange").and_then(|r| r.get("max"))))
        .or_else(|| positive_int(entity.get("nbEmployeesMax")))
}

fn it_staff(entity: &Value) -> Option<u64> {
    let categories = entity.get("employeeCategories")?.as_array()?;
    let total: u64 = categories
        .iter()
        .filter(|c| {
            c.get("category")
                .and_then(Value::as_str)
                .map(is_it_category)
                .unwrap_or(false)
        })
        .filter_map(|c| positive_int(c.get("nbEmployees")))
        .sum();
    (total > 0).then_some(total)
}

fn is_it_category(category: &str) -> bool {
    let lower = category.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    IT_KEYWORDS.iter().any(|kw| {
        if kw.len() <= 2 {
            words.contains(kw)
        } else {
            lower.contains(kw)
        }
    })
}

fn headquarters(entity: &Value) -> Option<Value> {
    let location = match entity.get("location") {
        Some(Value::Array(list)) => list.first(),
        Some(loc @ Value::Object(_)) => Some(loc),
        _ => None,
    }
    .or_else(|| entity.get("locations").and_then(Value::as_array).and_then(|l| l.first()))?;

    let mut address = Map::new();
    let parts = [
        ("country", location.get("country").and_then(name_of)),
        ("city", location.get("city").and_then(name_of)),
        ("state", location.get("region").and_then(name_of)),
        ("postal_code", str_field(location, "postalCode")),
        ("full_address", str_field(location, "address")),
    ];
    for (key, value) in parts {
        if let Some(v) = value {
            address.insert(key.to_string(), Value::String(v));
        }
    }
    (!address.is_empty()).then_some(Value::Object(address))
}

fn revenue(entity: &Value) -> Option<Value> {
    let rev = entity.get("revenue")?;
    let amount = rev.get("value").filter(|v| v.is_number())?;
    let mut out = Map::new();
    out.insert("amount".into(), amount.clone());
    if let Some(currency) = str_field(rev, "currency") {
        out.insert("currency".into(), Value::String(currency));
    }
    if let Some(range) = str_field(rev, "range") {
        out.insert("range".into(), Value::String(range));
    }
    Some(Value::Object(out))
}

fn sorted_names<F>(list: Option<&Value>, name: F) -> Option<Value>
where
    F: Fn(&Value) -> Option<String>,
{
    let names: BTreeSet<String> = list?.as_array()?.iter().filter_map(name).collect();
    (!names.is_empty()).then(|| Value::from(names.into_iter().collect::<Vec<_>>()))
}

fn competitors(entity: &Value) -> Option<Value> {
    let list = entity.get("competitors")?.as_array()?;
    let similar: Vec<Value> = list
        .iter()
        .take(MAX_LIST_ITEMS)
        .filter_map(|c| {
            let name = str_field(c, "name")?;
            Some(json!({
                "name": name,
                "url": str_field(c, "homepage").unwrap_or_default(),
                "description": str_field(c, "summary").unwrap_or_default(),
            }))
        })
        .collect();
    (!similar.is_empty()).then_some(Value::Array(similar))
}

fn relevant_articles(entity: &Value) -> Option<Value> {
    let articles = entity.get("articles")?.as_array()?;
    let updates: Vec<Value> = articles
        .iter()
        .filter_map(|article| {
            let text = format!(
                "{} {}",
                str_field(article, "title").unwrap_or_default(),
                str_field(article, "summary").unwrap_or_default()
            )
            .to_lowercase();
            if !NEWS_KEYWORDS.iter().any(|kw| text.contains(kw)) {
                return None;
            }
            Some(json!({
                "source": "diffbot",
                "date": article_date(article),
                "title": str_field(article, "title").unwrap_or_default(),
                "url": str_field(article, "url").unwrap_or_default(),
                "type": categorize(&text),
            }))
        })
        .collect();
    (!updates.is_empty()).then_some(Value::Array(updates))
}

fn article_date(article: &Value) -> String {
    match article.get("date") {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) => str_field(obj, "str").unwrap_or_default(),
        _ => String::new(),
    }
}

/// News category from lowercased title and summary text
pub fn categorize(text: &str) -> &'static str {
    if text.contains("merger") || text.contains("acquisition") {
        "M&A"
    } else if text.contains("hiring") {
        "Hiring"
    } else if text.contains("security") {
        "Security"
    } else if text.contains("digital transformation") {
        "Digital Transformation"
    } else {
        "Other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "data": [{
                "entity": {
                    "name": "Acme Corp",
                    "homepageUri": "acme.com",
                    "linkedInUri": "linkedin.com/company/acme",
                    "naicsClassification": [{"code": "5112"}, {"nbEmployees": 1200}],
                    "nbEmployees": 900,
                    "employeeCategories": [
                        {"category": "Software Engineering", "nbEmployees": 300},
                        {"category": "IT Support", "nbEmployees": 40},
                        {"category": "Facilities", "nbEmployees": 25},
                        {"category": "Sales", "nbEmployees": 100}
                    ],
                    "location": {
                        "country": {"name": "United States"},
                        "city": {"name": "Austin"},
                        "region": {"name": "Texas"},
                        "postalCode": "78701",
                        "address": "1 Main St, Austin, TX"
                    },
                    "revenue": {"value": 50000000, "currency": "USD"},
                    "industries": [{"name": "Software"}, {"name": "Cloud"}, "Software"],
                    "competitors": [
                        {"name": "Globex", "homepage": "globex.com", "summary": "Rival"}
                    ],
                    "technographics": [
                        {"technology": {"name": "Rust"}},
                        {"technology": {"name": "Kubernetes"}}
                    ],
                    "articles": [
                        {"title": "Acme announces acquisition of Foo", "url": "https://n/1",
                         "date": {"str": "d2024-05-01T00:00"}},
                        {"title": "Acme opens office", "summary": "ribbon cutting", "url": "https://n/2"}
                    ]
                }
            }]
        })
    }

    #[test]
    fn structures_the_first_entity() {
        let record = structure_response("Acme", &sample()).unwrap();
        assert_eq!(record.source_tag, SourceTag::Diffbot);
        assert_eq!(record.payload[fields::EMPLOYEE_COUNT], json!(1200));
        assert_eq!(record.payload[fields::IT_STAFF], json!(340));
        assert_eq!(record.payload[fields::HQ_ADDRESS]["state"], "Texas");
        assert_eq!(record.payload[fields::REVENUE], json!({"amount": 50000000, "currency": "USD"}));
        assert_eq!(record.payload[fields::INDUSTRY_VERTICALS], json!(["Cloud", "Software"]));
        assert_eq!(record.payload[fields::TECHNOLOGIES], json!(["Kubernetes", "Rust"]));
        assert_eq!(record.payload[fields::SIMILAR_COMPANIES][0]["url"], "globex.com");

        let news = record.payload[fields::NEWS_UPDATES].as_array().unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0]["type"], "M&A");
        assert_eq!(news[0]["date"], "d2024-05-01T00:00");
    }

    #[test]
    fn employee_count_falls_back_to_range() {
        let entity = json!({"employeesRange": {"min": 10, "max": 50}});
        assert_eq!(employee_count(&entity), Some(50));
    }

    #[test]
    fn empty_data_is_not_found() {
        let err = structure_response("Acme", &json!({"data": []})).unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn short_keywords_match_whole_words_only() {
        assert!(is_it_category("IT Operations"));
        assert!(!is_it_category("Facilities"));
        assert!(is_it_category("Data Science"));
    }
}
