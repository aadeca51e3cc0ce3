//! OpenAI-compatible chat-completions provider. Groq speaks the same
//! protocol, so both identities share this implementation with different
//! base URLs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{classify_status, classify_transport, GenerationOptions, Provider, ProviderId};
use crate::error::ProviderError;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    id: ProviderId,
}

impl OpenAiProvider {
    pub fn openai(api_key: String, model: &str) -> Self {
        Self::with_base_url(api_key, model, OPENAI_API_BASE, ProviderId::OpenAi)
    }

    pub fn groq(api_key: String, model: &str) -> Self {
        Self::with_base_url(api_key, model, GROQ_API_BASE, ProviderId::Groq)
    }

    fn with_base_url(api_key: String, model: &str, base_url: &str, id: ProviderId) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            model: model.to_string(),
            id,
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: ChatResponse = res.json().await.map_err(classify_transport)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("completion had no choices".to_string())
            })
    }

    fn id(&self) -> ProviderId {
        self.id
    }
}
