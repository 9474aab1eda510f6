use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::{
    config::AiConfig,
    error::AppError,
    services::ai::{GenerativeBackend, Prompt},
};

#[derive(Clone)]
pub struct GeminiBackend {
    http: Client,
    endpoint: Url,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiBackend {
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>, AppError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let base = config.base_url.as_str().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/models/{}:generateContent", config.model))
            .map_err(|err| AppError::Config(format!("invalid AI endpoint: {err}")))?;
        Ok(Some(Self {
            http: Client::new(),
            endpoint,
            api_key,
        }))
    }

    fn request_body(prompt: &Prompt) -> Value {
        let mut parts = vec![json!({ "text": prompt.text })];
        if let Some(image) = &prompt.image {
            parts.push(json!({
                "inline_data": { "mime_type": image.mime_type, "data": image.data }
            }));
        }
        json!({ "contents": [{ "parts": parts }] })
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AppError> {
        let response: GenerateResponse = self
            .http
            .post(self.endpoint.clone())
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text: String = response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect();
        if text.trim().is_empty() {
            return Err(AppError::Upstream("model returned no text".into()));
        }
        Ok(text)
    }
}
