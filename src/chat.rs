//! Client for the remote answering service. The contract is opaque: a
//! message string goes up, an answer with optional metadata comes back.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

pub struct ChatClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid chat endpoint URL")?;
        Ok(Self { endpoint, client: reqwest::Client::new() })
    }

    pub async fn ask(&self, message: &str) -> Result<ChatAnswer> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({"message": message}))
            .send()
            .await
            .context("answering service unreachable")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("answering service error: HTTP {status}");
        }
        let v: Value = resp.json().await.context("answering service returned invalid json")?;
        Ok(parse_answer(&v))
    }
}

fn parse_answer(v: &Value) -> ChatAnswer {
    // Some deployments answer under `answer`, older ones under `response`.
    let answer = v
        .get("answer")
        .and_then(|x| x.as_str())
        .or_else(|| v.get("response").and_then(|x| x.as_str()))
        .unwrap_or("No response received")
        .to_string();
    let sources = v.get("sources").and_then(|x| x.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|s| s.as_str())
            .map(|s| s.to_string())
            .collect()
    });
    let field = |name: &str| v.get(name).and_then(|x| x.as_str()).map(|s| s.to_string());
    ChatAnswer { answer, sources, topic: field("topic"), difficulty: field("difficulty") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_field_is_preferred() {
        let v = json!({"answer": "A", "response": "B", "topic": "history", "difficulty": "easy"});
        let parsed = parse_answer(&v);
        assert_eq!(parsed.answer, "A");
        assert_eq!(parsed.topic.as_deref(), Some("history"));
        assert_eq!(parsed.difficulty.as_deref(), Some("easy"));
    }

    #[test]
    fn response_field_is_the_fallback() {
        let parsed = parse_answer(&json!({"response": "B"}));
        assert_eq!(parsed.answer, "B");
        assert_eq!(parsed.sources, None);
    }

    #[test]
    fn missing_both_fields_yields_placeholder() {
        assert_eq!(parse_answer(&json!({})).answer, "No response received");
    }

    #[test]
    fn sources_keep_only_strings() {
        let parsed = parse_answer(&json!({"answer": "A", "sources": ["doc1", 42, "doc2"]}));
        assert_eq!(parsed.sources, Some(vec!["doc1".to_string(), "doc2".to_string()]));
    }
}
