use crate::app::ports::{AiQuery, SourceClient};
use crate::constants::{PERPLEXITY_CHAT_URL, PERPLEXITY_MODEL};
use crate::error::SourceError;
use crate::infra::http_client::json_body;
use crate::pipeline::ingestion::governor::RequestGovernor;
use crate::types::{fields, CompanyIdentity, FieldMap, RawSourceRecord, SourceTag};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

const NEWS_KEYS: &[&str] = &["source", "date", "title", "url", "type"];

const NEWS_TYPES: &[&str] = &[
    "M&A",
    "Hiring",
    "Security",
    "Digital Transformation",
    "Negative Customer Feedback",
    "Negative Press Feedback",
    "Other",
];

/// Chat-completions client used for field validation and news search.
pub struct PerplexityClient {
    http: reqwest::Client,
    token: String,
    governor: RequestGovernor,
    endpoint: String,
    model: String,
}

impl PerplexityClient {
    pub fn new(http: reqwest::Client, token: String, governor: RequestGovernor) -> Self {
        Self {
            http,
            token,
            governor,
            endpoint: PERPLEXITY_CHAT_URL.to_string(),
            model: PERPLEXITY_MODEL.to_string(),
        }
    }

    /// One completion, parsed as JSON. Unparseable answers surface as
    /// `InvalidResponse` so the governor retries them.
    async fn complete(&self, prompt: &str) -> Result<Value, SourceError> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "return_images": false,
            "return_related_questions": false,
            "presence_penalty": 0
        });
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let body = json_body(response, "perplexity").await?;
        let content = chat_content(&body)?;
        debug!(chars = content.len(), "perplexity answer received");
        parse_json_answer(content)
    }
}

#[async_trait]
impl AiQuery for PerplexityClient {
    async fn query_json(&self, prompt: &str) -> Result<Value, SourceError> {
        let this = self;
        self.governor.call("chat", move || this.complete(prompt)).await
    }
}

#[async_trait]
impl SourceClient for PerplexityClient {
    fn source(&self) -> SourceTag {
        SourceTag::Perplexity
    }

    #[instrument(skip(self, identity), fields(company = %identity.display_name()))]
    async fn fetch(&self, identity: &CompanyIdentity) -> Result<RawSourceRecord, SourceError> {
        let answer = self.query_json(&news_prompt(identity.display_name())).await?;
        let items = news_items(&answer);
        if items.is_empty() {
            return Err(SourceError::NotFound("no recent news".into()));
        }
        let mut payload = FieldMap::new();
        payload.insert(fields::NEWS_UPDATES.into(), Value::Array(items));
        Ok(RawSourceRecord::new(SourceTag::Perplexity, identity.display_name(), payload))
    }
}

pub fn news_prompt(company: &str) -> String {
    format!(
        "For {company}, return ONLY a JSON array within a code block of recent news items. \
         Each item must have exactly these keys: source, date, title, url, type. \
         Type must be one of: {types}. \
         Do not include explanations. \
         Format: ```[{{\"source\": \"value\", \"date\": \"YYYY-MM-DD\", \"title\": \"value\", \
         \"url\": \"value\", \"type\": \"value\"}}]```",
        company = company,
        types = NEWS_TYPES.join(", ")
    )
}

/// `choices[0].message.content` of a chat-completions response.
pub fn chat_content(body: &Value) -> Result<&str, SourceError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::InvalidResponse("completion without message content".into()))
}

pub fn parse_json_answer(content: &str) -> Result<Value, SourceError> {
    let block = extract_json_block(content)
        .ok_or_else(|| SourceError::InvalidResponse("no JSON found in answer".into()))?;
    Ok(serde_json::from_str(block)?)
}

/// Locate the JSON payload in a model answer.
///
/// Fenced code blocks are tried first, with an optional `json` language tag.
/// Without a parseable block, the span from the first opening bracket to the
/// last matching closing bracket is returned.
pub fn extract_json_block(content: &str) -> Option<&str> {
    if content.contains("```") {
        for block in content.split("```") {
            let mut candidate = block.trim();
            if candidate
                .get(..4)
                .map(|tag| tag.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
            {
                candidate = candidate[4..].trim();
            }
            let looks_like_json = candidate.starts_with('{') || candidate.starts_with('[');
            if looks_like_json && serde_json::from_str::<Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
    }
    bracket_span(content)
}

fn bracket_span(content: &str) -> Option<&str> {
    let start = content.find(['{', '['])?;
    let close = if content[start..].starts_with('{') { '}' } else { ']' };
    let end = content.rfind(close)?;
    (end > start).then(|| &content[start..=end])
}

/// Keep well-formed news objects, restricted to the agreed keys.
pub fn news_items(answer: &Value) -> Vec<Value> {
    let Some(list) = answer.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(Value::as_object)
        .filter(|item| {
            item.get("title")
                .and_then(Value::as_str)
                .map(|t| !t.trim().is_empty())
                .unwrap_or(false)
        })
        .map(|item| {
            let mut clean = Map::new();
            for key in NEWS_KEYS {
                let value = item.get(*key).cloned().unwrap_or(Value::String(String::new()));
                clean.insert(key.to_string(), value);
            }
            let known_type = clean
                .get("type")
                .and_then(Value::as_str)
                .map(|t| NEWS_TYPES.contains(&t))
                .unwrap_or(false);
            if !known_type {
                clean.insert("type".into(), Value::from("Other"));
            }
            Value::Object(clean)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let content = "Here you go:\n```json\n{\"total\": 420, \"confidence\": 0.9}\n```\nThanks";
        assert_eq!(extract_json_block(content), Some("{\"total\": 420, \"confidence\": 0.9}"));
    }

    #[test]
    fn falls_back_to_bracket_span() {
        let content = "The answer is [{\"title\": \"a\"}] as requested.";
        assert_eq!(extract_json_block(content), Some("[{\"title\": \"a\"}]"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn skips_unparseable_blocks() {
        let content = "```\nnot json\n``` then ```json\n[1, 2]\n```";
        assert_eq!(parse_json_answer(content).unwrap(), json!([1, 2]));
    }

    #[test]
    fn reads_message_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "```[]```"}}]});
        assert_eq!(chat_content(&body).unwrap(), "```[]```");
        assert!(matches!(
            chat_content(&json!({"choices": []})),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn news_items_are_normalized() {
        let answer = json!([
            {"source": "Reuters", "date": "2024-03-01", "title": "Acme buys Foo",
             "url": "https://r/1", "type": "M&A", "extra": true},
            {"title": "Acme layoffs", "type": "Layoffs"},
            {"source": "Blog"},
            "junk"
        ]);
        let items = news_items(&answer);
        assert_eq!(items.len(), 2);
        assert!(items[0].get("extra").is_none());
        assert_eq!(items[1]["type"], "Other");
        assert_eq!(items[1]["url"], "");
    }

    #[test]
    fn news_prompt_lists_types() {
        let prompt = news_prompt("Acme");
        assert!(prompt.starts_with("For Acme,"));
        assert!(prompt.contains("Negative Press Feedback"));
    }
}
