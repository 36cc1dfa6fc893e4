use super::{CandidateGenerator, GeneratedCandidate, GenerationRequest};
use async_trait::async_trait;
use std::time::Duration;

/// Generator reached over HTTP. The request body is the JSON-encoded
/// [`GenerationRequest`]; the reply is `{"sql": "..."}` or `{"sql": null}`
/// to decline.
pub struct HttpGenerator {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl CandidateGenerator for HttpGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<Option<GeneratedCandidate>> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("generator endpoint returned {}: {}", status, error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        let sql = match json.get("sql") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) => return Ok(None),
            _ => anyhow::bail!("generator response missing 'sql' field"),
        };
        let note = json
            .get("note")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(Some(GeneratedCandidate { sql, note }))
    }

    fn method(&self) -> &'static str {
        "http"
    }

    fn fingerprint(&self) -> Option<String> {
        Some(format!("http:{}", self.endpoint))
    }
}
